/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{net::Ipv6Addr, path::PathBuf, time::Duration};

use smtp_proto::{EhloResponse, EXT_START_TLS};
use tokio::net::TcpStream;

use crate::{transport::TlsPolicy, SmtpClient, SmtpClientBuilder};

use super::{stream::SmtpStream, tls::build_tls_connector, AssertReply};

impl<T: AsRef<str>> SmtpClientBuilder<T> {
    pub fn new(hostname: T, port: u16) -> Self {
        let addr = match hostname.as_ref().parse::<Ipv6Addr>() {
            Ok(ip) => format!("[{ip}]:{port}"),
            Err(_) => format!("{}:{}", hostname.as_ref(), port),
        };
        SmtpClientBuilder {
            addr,
            timeout: Duration::from_secs(60),
            tls_hostname: hostname,
            tls_implicit: true,
            tls_policy: TlsPolicy::Required,
            ca_file: None,
            local_host: local_hostname(),
            verbose: false,
        }
    }

    /// Start connection in TLS or upgrade with STARTTLS
    pub fn implicit_tls(mut self, tls_implicit: bool) -> Self {
        self.tls_implicit = tls_implicit;
        self
    }

    /// TLS requirement when the connection starts in clear text
    pub fn tls_policy(mut self, tls_policy: TlsPolicy) -> Self {
        self.tls_policy = tls_policy;
        self
    }

    /// PEM bundle of the certificate authorities to trust
    pub fn ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(ca_file.into());
        self
    }

    /// Set the EHLO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the SMTP connection timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log the protocol exchange at info level
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Connects, reads the greeting and negotiates TLS, returning the
    /// client together with the server capabilities.
    pub async fn connect(
        &self,
    ) -> crate::Result<(SmtpClient<SmtpStream>, EhloResponse<String>)> {
        tokio::time::timeout(self.timeout, async {
            let mut client = SmtpClient {
                stream: TcpStream::connect(&self.addr).await?,
                timeout: self.timeout,
                verbose: self.verbose,
            };

            if self.tls_implicit {
                let tls_connector = build_tls_connector(self.ca_file.as_deref())?;
                let mut client = client
                    .into_tls(&tls_connector, self.tls_hostname.as_ref())
                    .await?;
                // Read greeting
                client.read().await?.assert_positive_completion()?;
                let capabilities = client.ehlo(&self.local_host).await?;
                return Ok((client.into_stream(SmtpStream::Tls), capabilities));
            }

            // Read greeting
            client.read().await?.assert_positive_completion()?;

            // Send EHLO
            let capabilities = client.ehlo(&self.local_host).await?;

            if self.tls_policy == TlsPolicy::None {
                return Ok((client.into_stream(SmtpStream::Basic), capabilities));
            }
            if !capabilities.has_capability(EXT_START_TLS) {
                return if self.tls_policy == TlsPolicy::Required {
                    Err(crate::Error::MissingStartTls)
                } else {
                    log::debug!("STARTTLS not offered by {}, continuing in clear text", self.addr);
                    Ok((client.into_stream(SmtpStream::Basic), capabilities))
                };
            }

            let tls_connector = build_tls_connector(self.ca_file.as_deref())?;
            let mut client = client
                .start_tls(&tls_connector, self.tls_hostname.as_ref())
                .await?;
            let capabilities = client.ehlo(&self.local_host).await?;
            Ok((client.into_stream(SmtpStream::Tls), capabilities))
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }
}

impl<T> SmtpClient<T> {
    pub(crate) fn into_stream<U>(self, wrap: impl FnOnce(T) -> U) -> SmtpClient<U> {
        SmtpClient {
            stream: wrap(self.stream),
            timeout: self.timeout,
            verbose: self.verbose,
        }
    }
}

pub(crate) fn local_hostname() -> String {
    gethostname::gethostname()
        .to_str()
        .unwrap_or("[127.0.0.1]")
        .to_string()
}
