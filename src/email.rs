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

use std::{
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
};

use crate::{
    message::{self, MessageId, MessageSpec, CONTENT_TYPE_HTML, CONTENT_TYPE_TEXT},
    transport::{smtp::SmtpTransport, Status, TlsPolicy, Transport},
    Error, StreamCursor,
};

/// Outcome of a send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Ok,
    Failed { diagnostic: String, status: Status },
}

/// E-mail client owning one transport handle.
///
/// The public fields describe the next message. They are left untouched by
/// [`EmailClient::send`], and the transport is reset after every send, so the
/// same client can be reused for any number of sequential sends.
pub struct EmailClient<T: Transport = SmtpTransport> {
    pub server_url: String,
    pub sender: String,
    pub password: String,
    pub recipients: Vec<String>,
    pub cc_recipients: Vec<String>,
    pub subject: String,
    pub content_type: String,
    pub body: String,
    pub cert_path: PathBuf,
    html_crlf: bool,
    last_message_id: Option<MessageId>,
    transport: T,
}

/// Restores the transport to a blank state when dropped.
struct ResetOnDrop<'x, T: Transport>(&'x mut T);

impl EmailClient<SmtpTransport> {
    /// Creates a client submitting over SMTP.
    pub fn new() -> crate::Result<Self> {
        SmtpTransport::new().map(Self::with_transport)
    }
}

impl<T: Transport> EmailClient<T> {
    pub fn with_transport(transport: T) -> Self {
        EmailClient {
            server_url: String::new(),
            sender: String::new(),
            password: String::new(),
            recipients: Vec::new(),
            cc_recipients: Vec::new(),
            subject: String::new(),
            content_type: CONTENT_TYPE_TEXT.to_string(),
            body: String::new(),
            cert_path: PathBuf::new(),
            html_crlf: false,
            last_message_id: None,
            transport,
        }
    }

    /// Keep the trailing CRLF in the HTML content type set by
    /// [`EmailClient::embed_html`], as older releases did.
    ///
    /// The message builder always terminates the content type line, so this
    /// produces an empty line right after the `Content-Type` header.
    pub fn html_crlf_terminated(&mut self, enable: bool) -> &mut Self {
        self.html_crlf = enable;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Identifier of the message built by the last send.
    pub fn last_message_id(&self) -> Option<&MessageId> {
        self.last_message_id.as_ref()
    }

    /// Appends an HTML document to the body and switches the content type
    /// to HTML.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be opened or read.
    pub fn embed_html(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Err(err) = self.try_embed_html(path) {
            panic!("Cannot embed {}: {err}", path.display());
        }
    }

    /// Fallible form of [`EmailClient::embed_html`]. The body is left
    /// unchanged on error.
    pub fn try_embed_html(&mut self, path: impl AsRef<Path>) -> crate::Result<()> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path).map_err(Error::HtmlSource)?);
        let mut html = String::new();
        let mut line = Vec::new();
        let mut lines = 0;

        // Bytes that are not UTF-8 are replaced, not rejected
        while reader
            .read_until(b'\n', &mut line)
            .map_err(Error::HtmlSource)?
            > 0
        {
            let text = line.strip_suffix(b"\n").unwrap_or(&line);
            let text = text.strip_suffix(b"\r").unwrap_or(text);
            html.push_str(&String::from_utf8_lossy(text));
            html.push_str("\r\n");
            line.clear();
            lines += 1;
        }

        self.body.push_str(&html);
        self.content_type = if self.html_crlf {
            format!("{CONTENT_TYPE_HTML}\r\n")
        } else {
            CONTENT_TYPE_HTML.to_string()
        };
        log::debug!("Embedded {lines} lines of HTML from {}", path.display());

        Ok(())
    }

    /// Checks that the client is ready to send.
    pub fn validate(&self) -> crate::Result<()> {
        if self.sender.is_empty() {
            Err(Error::MissingMailFrom)
        } else if self.password.is_empty() {
            Err(Error::MissingCredentials)
        } else if self.cert_path.as_os_str().is_empty() {
            Err(Error::MissingCertificate)
        } else if self.recipients.is_empty() {
            Err(Error::MissingRcptTo)
        } else {
            Ok(())
        }
    }

    /// Builds the message and submits it through the transport.
    ///
    /// # Panics
    ///
    /// Panics if the sender, password, certificate path or recipient list
    /// is empty.
    pub fn send(&mut self, verbose: bool) -> SendResult {
        match self.try_send(verbose) {
            Ok(result) => result,
            Err(err) => panic!("Invalid e-mail configuration: {err}"),
        }
    }

    /// Like [`EmailClient::send`], but returns the configuration error
    /// instead of panicking. The transport is not touched in that case.
    pub fn try_send(&mut self, verbose: bool) -> crate::Result<SendResult> {
        self.validate()?;

        let payload = message::build(&MessageSpec {
            from: &self.sender,
            to: &self.recipients,
            cc: &self.cc_recipients,
            subject: &self.subject,
            content_type: &self.content_type,
            body: &self.body,
        });
        let mut cursor = StreamCursor::new(&payload);
        log::debug!(
            "Sending message {} ({} bytes) to {} recipients",
            payload.message_id(),
            payload.len(),
            self.recipients.len() + self.cc_recipients.len()
        );

        let mut transport = ResetOnDrop(&mut self.transport);
        transport.credentials(&self.sender, &self.password);
        transport.url(&self.server_url);
        transport.use_tls(TlsPolicy::Required);
        transport.ca_file(&self.cert_path);
        transport.mail_from(&self.sender);
        transport.rcpt_to(
            self.recipients
                .iter()
                .chain(&self.cc_recipients)
                .cloned()
                .collect(),
        );
        transport.upload(true);
        if verbose {
            transport.verbose(true);
        }

        let status = transport.perform(&mut |buf: &mut [u8]| cursor.fill(buf));
        let result = if status.is_ok() {
            log::info!("Message {} delivered", payload.message_id());
            SendResult::Ok
        } else {
            let diagnostic = transport.status_text(status);
            log::warn!(
                "Message {} not delivered: {diagnostic} ({})",
                payload.message_id(),
                status.code()
            );
            SendResult::Failed { diagnostic, status }
        };
        drop(transport);

        self.last_message_id = Some(payload.message_id().clone());
        Ok(result)
    }
}

impl<T: Transport> Drop for ResetOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.release_recipients();
        self.0.reset();
    }
}

impl<T: Transport> Deref for ResetOnDrop<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl<T: Transport> DerefMut for ResetOnDrop<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}

impl SendResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, SendResult::Ok)
    }

    pub fn status(&self) -> Status {
        match self {
            SendResult::Ok => Status::Ok,
            SendResult::Failed { status, .. } => *status,
        }
    }

    /// Human readable diagnostic, empty on success.
    pub fn what(&self) -> &str {
        match self {
            SendResult::Ok => "",
            SendResult::Failed { diagnostic, .. } => diagnostic,
        }
    }

    pub fn into_result(self) -> crate::Result<()> {
        match self {
            SendResult::Ok => Ok(()),
            SendResult::Failed { diagnostic, status } => {
                Err(Error::Transport { status, diagnostic })
            }
        }
    }
}

impl Display for SendResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendResult::Ok => f.write_str("Message sent"),
            SendResult::Failed { diagnostic, status } => {
                write!(f, "{diagnostic} (status {})", status.code())
            }
        }
    }
}
