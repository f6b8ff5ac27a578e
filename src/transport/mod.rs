/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Mail transport collaborator.
//!
//! A [`Transport`] is a reusable handle that is configured option by option,
//! performs one submission while pulling the message from a callback, and is
//! then reset to a blank state.

use std::{
    fmt::Display,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Once,
    },
};

pub mod smtp;

#[cfg(not(any(feature = "ring", feature = "aws_lc_rs")))]
compile_error!("either the `ring` or the `aws_lc_rs` feature must be enabled");

/// Pull callback: fills the provided buffer and returns the number of bytes
/// written. Returning zero signals the end of the message.
pub type ReadCallback<'x> = dyn FnMut(&mut [u8]) -> usize + 'x;

/// TLS requirement for a submission session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    /// Never use TLS (unless the URL requests implicit TLS).
    #[default]
    None,
    /// Upgrade with STARTTLS when the server offers it.
    Opportunistic,
    /// TLS for the whole session, fail otherwise.
    Required,
}

/// Terminal status of a transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    NotInitialized,
    NotConfigured,
    UrlMalformed,
    UnsupportedProtocol,
    ConnectFailed,
    CaFileUnreadable,
    TlsFailed,
    StartTlsUnavailable,
    LoginDenied,
    AuthUnsupported,
    MailFromRejected,
    RcptRejected,
    DataRejected,
    SendFailed,
    ProtocolError,
    Timeout,
}

/// Transport handle driven by a submission session.
pub trait Transport {
    /// Sets the username and secret used to authenticate.
    fn credentials(&mut self, username: &str, secret: &str);

    /// Sets the destination URL.
    fn url(&mut self, url: &str);

    fn use_tls(&mut self, policy: TlsPolicy);

    /// Sets the PEM certificate bundle used to verify the server.
    fn ca_file(&mut self, path: &Path);

    /// Sets the envelope sender.
    fn mail_from(&mut self, address: &str);

    /// Sets the envelope recipients.
    fn rcpt_to(&mut self, recipients: Vec<String>);

    fn verbose(&mut self, enable: bool);

    /// Marks the operation as a message upload.
    fn upload(&mut self, enable: bool);

    /// Runs the operation to completion, pulling the message from `source`.
    fn perform(&mut self, source: &mut ReadCallback<'_>) -> Status;

    /// Human readable description of a status.
    fn status_text(&self, status: Status) -> String {
        status.to_string()
    }

    /// Drops the envelope recipient list.
    fn release_recipients(&mut self);

    /// Returns the handle to a blank, reusable state.
    fn reset(&mut self);
}

static LIVE: AtomicUsize = AtomicUsize::new(0);
static CRYPTO_PROVIDER: Once = Once::new();

/// Process-wide transport initialization.
///
/// Hold a guard for as long as any transport is in use. The crypto provider
/// is installed by the first guard; the library stays live until the last
/// guard is dropped.
#[derive(Debug)]
pub struct Library {
    _private: (),
}

impl Library {
    pub fn init() -> Self {
        CRYPTO_PROVIDER.call_once(|| {
            if crypto_provider().install_default().is_err() {
                log::debug!("Using previously installed crypto provider");
            }
        });
        if LIVE.fetch_add(1, Ordering::SeqCst) == 0 {
            log::debug!("Transport library initialized");
        }
        Library { _private: () }
    }

    pub fn is_live() -> bool {
        LIVE.load(Ordering::SeqCst) > 0
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        if LIVE.fetch_sub(1, Ordering::SeqCst) == 1 {
            log::debug!("Transport library released");
        }
    }
}

#[cfg(feature = "ring")]
fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(all(feature = "aws_lc_rs", not(feature = "ring")))]
fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Numeric code of the status, zero meaning success.
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 0,
            Status::NotInitialized => 2,
            Status::NotConfigured => 3,
            Status::UrlMalformed => 4,
            Status::UnsupportedProtocol => 5,
            Status::ConnectFailed => 10,
            Status::CaFileUnreadable => 20,
            Status::TlsFailed => 21,
            Status::StartTlsUnavailable => 22,
            Status::LoginDenied => 30,
            Status::AuthUnsupported => 31,
            Status::MailFromRejected => 40,
            Status::RcptRejected => 41,
            Status::DataRejected => 42,
            Status::SendFailed => 50,
            Status::ProtocolError => 51,
            Status::Timeout => 60,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Ok => "No error",
            Status::NotInitialized => "Transport library not initialized",
            Status::NotConfigured => "Operation not configured for upload",
            Status::UrlMalformed => "URL using bad/illegal format or missing URL",
            Status::UnsupportedProtocol => "Unsupported protocol",
            Status::ConnectFailed => "Could not connect to server",
            Status::CaFileUnreadable => "Problem with the CA cert bundle",
            Status::TlsFailed => "TLS connect error",
            Status::StartTlsUnavailable => "Requested TLS level failed",
            Status::LoginDenied => "Login denied",
            Status::AuthUnsupported => "No supported authentication mechanism",
            Status::MailFromRejected => "Sender address rejected",
            Status::RcptRejected => "Recipient address rejected",
            Status::DataRejected => "Message data rejected",
            Status::SendFailed => "Failed sending data to the peer",
            Status::ProtocolError => "Weird server reply",
            Status::Timeout => "Timeout was reached",
        })
    }
}
