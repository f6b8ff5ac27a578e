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

//! # mail-submit
//!
//! _mail-submit_ composes a raw e-mail message and submits it to a mail
//! submission endpoint over an authenticated, TLS-protected SMTP session.
//! The message body is never handed to the transport in one piece: the
//! transport pulls it in bounded chunks from a cursor over the built buffer.
//!
//! - Builds the wire payload (header block, blank line, body) with a single
//!   allocation.
//! - Streams the payload through a one-shot, resumable read cursor.
//! - Submits over implicit TLS (`smtps://`) or STARTTLS (`smtp://`) with a
//!   custom CA bundle.
//! - SMTP authentication (_RFC 4954_) with automatic mechanism negotiation:
//!   CRAM-MD5, LOGIN and PLAIN.
//! - Maps the transport outcome to a typed [`SendResult`].
//!
//! ## Usage Example
//!
//! ```rust
//!     // Bracket all transport use with the process-wide guard.
//!     let _library = Library::init();
//!
//!     let mut email = EmailClient::new()?;
//!     email.server_url = "smtps://smtp.gmail.com:465".into();
//!     email.sender = "john@example.com".into();
//!     email.password = "app-password".into();
//!     email.cert_path = "/etc/ssl/certs/ca-certificates.crt".into();
//!     email.recipients = vec!["jane@example.com".into()];
//!     email.subject = "Hi!".into();
//!     email.embed_html("./welcome.html");
//!
//!     let result = email.send(false);
//!     if !result.is_ok() {
//!         eprintln!("Delivery failed: {}", result.what());
//!     }
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod cursor;
pub mod email;
pub mod message;
pub mod smtp;
#[forbid(unsafe_code)]
pub mod transport;

use std::{fmt::Display, path::PathBuf, time::Duration};

pub use cursor::StreamCursor;
pub use email::{EmailClient, SendResult};
pub use message::{build, MessageId, MessageSpec, WireBuffer};
use smtp_proto::Response;
pub use transport::{smtp::SmtpTransport, Library, Status, TlsPolicy, Transport};

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    /// SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Server URL could not be parsed.
    InvalidUrl,

    /// Server URL uses a scheme other than smtp or smtps.
    UnsupportedScheme(String),

    /// Missing authentication credentials.
    MissingCredentials,

    /// Missing message sender.
    MissingMailFrom,

    /// Missing message recipients.
    MissingRcptTo,

    /// Missing certificate bundle path.
    MissingCertificate,

    /// STARTTLS not available
    MissingStartTls,

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// The certificate bundle could not be loaded.
    CaFile(std::io::Error),

    /// The HTML source could not be read.
    HtmlSource(std::io::Error),

    /// The transport reported a failed submission.
    Transport { status: Status, diagnostic: String },

    /// Connection timeout.
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client session over a connected stream.
pub struct SmtpClient<T> {
    pub stream: T,
    pub timeout: Duration,
    pub verbose: bool,
}

/// Connection parameters for an [`SmtpClient`].
#[derive(Clone)]
pub struct SmtpClientBuilder<T: AsRef<str>> {
    pub timeout: Duration,
    pub tls_hostname: T,
    pub tls_implicit: bool,
    pub tls_policy: TlsPolicy,
    pub ca_file: Option<PathBuf>,
    pub local_host: String,
    pub addr: String,
    pub verbose: bool,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) | Error::CaFile(err) | Error::HtmlSource(err) => Some(err),
            Error::Tls(err) => Some(err.as_ref()),
            Error::Base64(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => write!(f, "Unexpected reply: {e}"),
            Error::AuthenticationFailed(e) => write!(f, "Authentication failed: {e}"),
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::InvalidUrl => write!(f, "Invalid server URL"),
            Error::UnsupportedScheme(scheme) => write!(f, "Unsupported URL scheme {scheme:?}"),
            Error::MissingCredentials => write!(f, "Missing authentication credentials"),
            Error::MissingMailFrom => write!(f, "Missing message sender"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::MissingCertificate => write!(f, "Missing certificate bundle path"),
            Error::MissingStartTls => write!(f, "STARTTLS extension unavailable"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::CaFile(e) => write!(f, "Failed to load certificate bundle: {e}"),
            Error::HtmlSource(e) => write!(f, "Failed to read HTML source: {e}"),
            Error::Transport { status, diagnostic } => {
                write!(f, "Submission failed ({}): {diagnostic}", status.code())
            }
            Error::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(Box::new(err))
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}
