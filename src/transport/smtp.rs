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
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::runtime::Runtime;
use url::Host;

use crate::{
    smtp::{auth::Credentials, builder::local_hostname},
    Error, SmtpClientBuilder,
};

use super::{Library, ReadCallback, Status, TlsPolicy, Transport};

/// Transport submitting messages over SMTP.
///
/// Each call to [`Transport::perform`] opens a connection, negotiates TLS,
/// authenticates, submits the envelope, streams the message and quits. The
/// exchange runs on a single-threaded runtime owned by the transport and
/// blocks the calling thread until it completes.
pub struct SmtpTransport {
    runtime: Runtime,
    timeout: Duration,
    helo_host: String,
    options: Options,
    last_error: Option<Error>,
}

#[derive(Debug, Default)]
struct Options {
    credentials: Option<Credentials>,
    url: Option<String>,
    tls_policy: TlsPolicy,
    ca_file: Option<PathBuf>,
    mail_from: Option<String>,
    rcpt_to: Vec<String>,
    verbose: bool,
    upload: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    implicit_tls: bool,
}

struct Failure {
    status: Status,
    error: Error,
}

impl SmtpTransport {
    pub fn new() -> crate::Result<Self> {
        Ok(SmtpTransport {
            runtime: tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?,
            timeout: Duration::from_secs(60),
            helo_host: local_hostname(),
            options: Options::default(),
            last_error: None,
        })
    }

    /// Sets the timeout of each exchange with the server.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the EHLO hostname.
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.helo_host = host.into();
        self
    }

    /// Detailed error behind the last failed operation.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    async fn submit(&self, source: &mut ReadCallback<'_>) -> Result<usize, Failure> {
        let options = &self.options;
        let endpoint = Endpoint::parse(
            options
                .url
                .as_deref()
                .ok_or_else(|| Failure::new(Status::UrlMalformed, Error::InvalidUrl))?,
        )
        .map_err(|err| Failure::new(Status::UrlMalformed, err))?;
        if options.rcpt_to.is_empty() {
            return Err(Failure::new(Status::NotConfigured, Error::MissingRcptTo));
        }

        let mut builder = SmtpClientBuilder::new(endpoint.host.as_str(), endpoint.port)
            .implicit_tls(endpoint.implicit_tls)
            .tls_policy(options.tls_policy)
            .helo_host(self.helo_host.as_str())
            .timeout(self.timeout)
            .verbose(options.verbose);
        if let Some(ca_file) = &options.ca_file {
            builder = builder.ca_file(ca_file);
        }

        let (mut client, capabilities) = builder
            .connect()
            .await
            .map_err(|err| Failure::new(Status::ConnectFailed, err))?;

        if let Some(credentials) = &options.credentials {
            client
                .authenticate(credentials, &capabilities)
                .await
                .map_err(|err| Failure::new(Status::LoginDenied, err))?;
        }

        client
            .mail_from(options.mail_from.as_deref().unwrap_or_default())
            .await
            .map_err(|err| Failure::new(Status::MailFromRejected, err))?;
        for rcpt in &options.rcpt_to {
            client
                .rcpt_to(rcpt)
                .await
                .map_err(|err| Failure::new(Status::RcptRejected, err))?;
        }
        let written = client
            .data_from(source)
            .await
            .map_err(|err| Failure::new(Status::DataRejected, err))?;

        if let Err(err) = client.quit().await {
            log::debug!("QUIT failed after delivery: {err}");
        }

        Ok(written)
    }
}

impl Transport for SmtpTransport {
    fn credentials(&mut self, username: &str, secret: &str) {
        self.options.credentials = Some(Credentials::new(username, secret));
    }

    fn url(&mut self, url: &str) {
        self.options.url = Some(url.to_string());
    }

    fn use_tls(&mut self, policy: TlsPolicy) {
        self.options.tls_policy = policy;
    }

    fn ca_file(&mut self, path: &Path) {
        self.options.ca_file = Some(path.to_path_buf());
    }

    fn mail_from(&mut self, address: &str) {
        self.options.mail_from = Some(address.to_string());
    }

    fn rcpt_to(&mut self, recipients: Vec<String>) {
        self.options.rcpt_to = recipients;
    }

    fn verbose(&mut self, enable: bool) {
        self.options.verbose = enable;
    }

    fn upload(&mut self, enable: bool) {
        self.options.upload = enable;
    }

    fn perform(&mut self, source: &mut ReadCallback<'_>) -> Status {
        let result = if !Library::is_live() {
            Err(Failure {
                status: Status::NotInitialized,
                error: Error::Io(std::io::Error::other("transport library not initialized")),
            })
        } else if !self.options.upload {
            Err(Failure {
                status: Status::NotConfigured,
                error: Error::Io(std::io::Error::other("operation not marked as upload")),
            })
        } else {
            self.runtime.block_on(self.submit(source))
        };

        match result {
            Ok(written) => {
                log::debug!(
                    "Submitted {written} bytes to {} recipients",
                    self.options.rcpt_to.len()
                );
                self.last_error = None;
                Status::Ok
            }
            Err(Failure { status, error }) => {
                log::debug!("Submission failed ({status}): {error}");
                self.last_error = Some(error);
                status
            }
        }
    }

    fn release_recipients(&mut self) {
        self.options.rcpt_to = Vec::new();
    }

    fn reset(&mut self) {
        self.options = Options::default();
        self.last_error = None;
    }
}

impl Endpoint {
    fn parse(url: &str) -> crate::Result<Self> {
        let url = url::Url::parse(url).map_err(|_| Error::InvalidUrl)?;
        let (implicit_tls, default_port) = match url.scheme() {
            "smtps" => (true, 465),
            "smtp" => (false, 587),
            scheme => return Err(Error::UnsupportedScheme(scheme.to_string())),
        };
        let host = match url.host().ok_or(Error::InvalidUrl)? {
            Host::Domain("") => return Err(Error::InvalidUrl),
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(addr) => addr.to_string(),
            // Unbracketed, as expected by the TLS server name
            Host::Ipv6(addr) => addr.to_string(),
        };

        Ok(Endpoint {
            host,
            port: url.port().unwrap_or(default_port),
            implicit_tls,
        })
    }
}

impl Failure {
    /// Classifies `error` raised during the step whose rejection is `rejected`.
    fn new(rejected: Status, error: Error) -> Self {
        let status = match &error {
            Error::UnexpectedReply(_) => rejected,
            Error::AuthenticationFailed(_) | Error::Auth(_) | Error::Base64(_) => {
                Status::LoginDenied
            }
            Error::UnsupportedAuthMechanism => Status::AuthUnsupported,
            Error::MissingStartTls => Status::StartTlsUnavailable,
            Error::CaFile(_) => Status::CaFileUnreadable,
            Error::Tls(_) | Error::InvalidTLSName => Status::TlsFailed,
            Error::InvalidUrl => Status::UrlMalformed,
            Error::UnsupportedScheme(_) => Status::UnsupportedProtocol,
            Error::UnparseableReply => Status::ProtocolError,
            Error::Timeout => Status::Timeout,
            Error::Io(_) if rejected == Status::ConnectFailed => Status::ConnectFailed,
            Error::Io(_) => Status::SendFailed,
            _ => rejected,
        };
        Failure { status, error }
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::{BufRead, BufReader, Read, Write},
        net::TcpListener,
        sync::Arc,
        thread::JoinHandle,
        time::Duration,
    };

    use rustls::{ServerConfig, ServerConnection, StreamOwned};

    use super::{Endpoint, SmtpTransport};
    use crate::{
        smtp::tls::test::self_signed, EmailClient, Library, SendResult, Status, StreamCursor,
        TlsPolicy, Transport,
    };

    /// Blocking scripted SMTP server accepting one connection, optionally
    /// over implicit TLS.
    fn serve_with(
        tls: Option<Arc<ServerConfig>>,
        script: Vec<(&'static str, &'static str)>,
    ) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            match tls {
                Some(config) => run_script(
                    StreamOwned::new(ServerConnection::new(config).unwrap(), stream),
                    script,
                ),
                None => run_script(stream, script),
            }
        });
        (port, handle)
    }

    fn serve(script: Vec<(&'static str, &'static str)>) -> (u16, JoinHandle<Vec<String>>) {
        serve_with(None, script)
    }

    fn reply<S: Write>(stream: &mut BufReader<S>, text: &str) {
        stream.get_mut().write_all(text.as_bytes()).unwrap();
        stream.get_mut().flush().unwrap();
    }

    fn run_script<S: Read + Write>(
        stream: S,
        script: Vec<(&'static str, &'static str)>,
    ) -> Vec<String> {
        let mut stream = BufReader::new(stream);
        let mut data = Vec::new();
        reply(&mut stream, "220 localhost ESMTP\r\n");

        for (expected, text) in script {
            let mut line = String::new();
            if expected == "." {
                loop {
                    line.clear();
                    stream.read_line(&mut line).unwrap();
                    if line == ".\r\n" {
                        break;
                    }
                    data.push(line.clone());
                }
            } else {
                stream.read_line(&mut line).unwrap();
                assert!(
                    line.starts_with(expected),
                    "expected {expected:?}, got {line:?}"
                );
            }
            reply(&mut stream, text);
        }
        data
    }

    fn transport(port: u16) -> SmtpTransport {
        let mut transport = SmtpTransport::new()
            .unwrap()
            .timeout(Duration::from_secs(10))
            .helo_host("test.local");
        transport.url(&format!("smtp://127.0.0.1:{port}"));
        transport.use_tls(TlsPolicy::None);
        transport.credentials("a@x.com", "secret");
        transport.mail_from("a@x.com");
        transport.rcpt_to(vec!["b@x.com".to_string(), "c@x.com".to_string()]);
        transport.upload(true);
        transport.verbose(true);
        transport
    }

    #[test]
    fn parse_endpoint() {
        assert_eq!(
            Endpoint::parse("smtps://smtp.gmail.com:465").unwrap(),
            Endpoint {
                host: "smtp.gmail.com".to_string(),
                port: 465,
                implicit_tls: true
            }
        );
        assert_eq!(
            Endpoint::parse("smtp://mail.example.org").unwrap(),
            Endpoint {
                host: "mail.example.org".to_string(),
                port: 587,
                implicit_tls: false
            }
        );
        assert_eq!(Endpoint::parse("smtps://mx.example.org").unwrap().port, 465);
        assert_eq!(
            Endpoint::parse("smtps://[::1]:4465").unwrap(),
            Endpoint {
                host: "::1".to_string(),
                port: 4465,
                implicit_tls: true
            }
        );
        assert_eq!(
            Endpoint::parse("smtp://192.0.2.7").unwrap().host,
            "192.0.2.7"
        );
        assert!(matches!(
            Endpoint::parse("https://example.org"),
            Err(crate::Error::UnsupportedScheme(scheme)) if scheme == "https"
        ));
        assert!(matches!(
            Endpoint::parse("not a url"),
            Err(crate::Error::InvalidUrl)
        ));
        assert!(matches!(
            Endpoint::parse("smtp://"),
            Err(crate::Error::InvalidUrl)
        ));
    }

    #[test]
    fn submit_over_smtp() {
        let _library = Library::init();
        let message = b"To: <b@x.com> \r\n\r\nhello\r\n.world".to_vec();

        let (port, server) = serve(vec![
            ("EHLO test.local", "250-localhost\r\n250 AUTH PLAIN\r\n"),
            ("AUTH PLAIN AGFAeC5jb20Ac2VjcmV0", "235 2.7.0 Accepted\r\n"),
            ("MAIL FROM:<a@x.com>", "250 2.1.0 Ok\r\n"),
            ("RCPT TO:<b@x.com>", "250 2.1.5 Ok\r\n"),
            ("RCPT TO:<c@x.com>", "250 2.1.5 Ok\r\n"),
            ("DATA", "354 Go ahead\r\n"),
            (".", "250 2.0.0 Queued\r\n"),
            ("QUIT", "221 2.0.0 Bye\r\n"),
        ]);
        let mut transport = transport(port);
        let mut cursor = StreamCursor::new(&message);
        let status = transport.perform(&mut |buf: &mut [u8]| cursor.fill(buf));

        assert_eq!(status, Status::Ok);
        assert!(transport.last_error().is_none());
        assert_eq!(
            server.join().unwrap(),
            vec!["To: <b@x.com> \r\n", "\r\n", "hello\r\n", "..world\r\n"]
        );
    }

    #[test]
    fn recipient_rejected() {
        let _library = Library::init();
        let message = b"To: <b@x.com> \r\n\r\nhello".to_vec();

        let (port, server) = serve(vec![
            ("EHLO", "250-localhost\r\n250 AUTH PLAIN\r\n"),
            ("AUTH PLAIN", "235 2.7.0 Accepted\r\n"),
            ("MAIL FROM", "250 2.1.0 Ok\r\n"),
            ("RCPT TO:<b@x.com>", "550 5.1.1 No such user\r\n"),
        ]);
        let mut transport = transport(port);
        let mut cursor = StreamCursor::new(&message);
        let status = transport.perform(&mut |buf: &mut [u8]| cursor.fill(buf));

        assert_eq!(status, Status::RcptRejected);
        assert_eq!(transport.status_text(status), "Recipient address rejected");
        assert!(matches!(
            transport.last_error(),
            Some(crate::Error::UnexpectedReply(reply)) if reply.code() == 550
        ));
        assert_eq!(cursor.position(), 0);
        server.join().unwrap();

        transport.reset();
        assert!(transport.last_error().is_none());
    }

    #[test]
    fn login_denied() {
        let _library = Library::init();
        let (port, server) = serve(vec![
            ("EHLO", "250-localhost\r\n250 AUTH PLAIN\r\n"),
            ("AUTH PLAIN", "535 5.7.8 Bad credentials\r\n"),
        ]);
        let mut transport = transport(port);
        assert_eq!(transport.perform(&mut |_: &mut [u8]| 0), Status::LoginDenied);
        server.join().unwrap();
    }

    #[test]
    fn connection_refused() {
        let _library = Library::init();
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport = transport(port);
        assert_eq!(transport.perform(&mut |_: &mut [u8]| 0), Status::ConnectFailed);
        assert!(transport.last_error().is_some());
    }

    #[test]
    fn incomplete_configuration() {
        let _library = Library::init();
        let mut transport = SmtpTransport::new().unwrap();

        transport.url("smtp://127.0.0.1:1");
        transport.rcpt_to(vec!["b@x.com".to_string()]);
        assert_eq!(transport.perform(&mut |_: &mut [u8]| 0), Status::NotConfigured);

        transport.upload(true);
        transport.url("imap://127.0.0.1");
        assert_eq!(
            transport.perform(&mut |_: &mut [u8]| 0),
            Status::UnsupportedProtocol
        );

        transport.url("smtp://");
        assert_eq!(transport.perform(&mut |_: &mut [u8]| 0), Status::UrlMalformed);

        transport.url("smtp://127.0.0.1:1");
        transport.release_recipients();
        assert_eq!(transport.perform(&mut |_: &mut [u8]| 0), Status::NotConfigured);

        transport.reset();
        assert_eq!(transport.perform(&mut |_: &mut [u8]| 0), Status::NotConfigured);
    }

    #[test]
    fn send_over_implicit_tls() {
        let _library = Library::init();
        let cert = self_signed();
        let (port, server) = serve_with(
            Some(cert.server_config.clone()),
            vec![
                ("EHLO test.local", "250-localhost\r\n250 AUTH PLAIN\r\n"),
                ("AUTH PLAIN AGFAeC5jb20Ac2VjcmV0", "235 2.7.0 Accepted\r\n"),
                ("MAIL FROM:<a@x.com>", "250 2.1.0 Ok\r\n"),
                ("RCPT TO:<b@x.com>", "250 2.1.5 Ok\r\n"),
                ("DATA", "354 Go ahead\r\n"),
                (".", "250 2.0.0 Queued\r\n"),
                ("QUIT", "221 2.0.0 Bye\r\n"),
            ],
        );

        let mut client = EmailClient::with_transport(
            SmtpTransport::new()
                .unwrap()
                .timeout(Duration::from_secs(10))
                .helo_host("test.local"),
        );
        client.server_url = format!("smtps://localhost:{port}");
        client.sender = "a@x.com".to_string();
        client.password = "secret".to_string();
        client.cert_path = cert.ca_file.path().to_path_buf();
        client.recipients = vec!["b@x.com".to_string()];
        client.subject = "Hi".to_string();
        client.body = "hello".to_string();

        assert_eq!(client.send(false), SendResult::Ok);
        let data = server.join().unwrap();
        assert_eq!(data.first().map(String::as_str), Some("To: <b@x.com> \r\n"));
        assert!(data.contains(&"Subject: Hi\r\n".to_string()));
        assert_eq!(data.last().map(String::as_str), Some("hello\r\n"));
    }

    #[test]
    fn send_with_untrusted_bundle() {
        let _library = Library::init();
        let cert = self_signed();
        let other = self_signed();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server_config = cert.server_config.clone();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut stream =
                StreamOwned::new(ServerConnection::new(server_config).unwrap(), stream);
            assert!(stream.write_all(b"220 localhost ESMTP\r\n").is_err()
                || stream.flush().is_err());
        });

        let mut transport = transport(port);
        transport.url(&format!("smtps://localhost:{port}"));
        transport.use_tls(TlsPolicy::Required);
        transport.ca_file(other.ca_file.path());
        assert_eq!(transport.perform(&mut |_: &mut [u8]| 0), Status::TlsFailed);
        server.join().unwrap();
    }
}
