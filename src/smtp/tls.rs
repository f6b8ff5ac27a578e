/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{convert::TryFrom, fs::File, io, io::BufReader, path::Path, sync::Arc};

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{ServerName, TrustAnchor};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::{Error, SmtpClient};

use super::AssertReply;

impl SmtpClient<TcpStream> {
    /// Upgrade the connection to TLS.
    pub async fn start_tls(
        mut self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<SmtpClient<TlsStream<TcpStream>>> {
        // Send STARTTLS command
        self.cmd(b"STARTTLS\r\n")
            .await?
            .assert_positive_completion()?;

        self.into_tls(tls_connector, hostname).await
    }

    /// Performs the TLS handshake over the current connection.
    pub async fn into_tls(
        self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<SmtpClient<TlsStream<TcpStream>>> {
        let server_name = ServerName::try_from(hostname)
            .map_err(|_| Error::InvalidTLSName)?
            .to_owned();
        let stream = tokio::time::timeout(
            self.timeout,
            tls_connector.connect(server_name, self.stream),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(handshake_error)?;

        if let Some(version) = stream.get_ref().1.protocol_version() {
            log::debug!("TLS session with {hostname} established ({version:?})");
        }

        Ok(SmtpClient {
            stream,
            timeout: self.timeout,
            verbose: self.verbose,
        })
    }
}

fn handshake_error(err: io::Error) -> Error {
    let kind = err.kind();
    match err.into_inner().map(|inner| inner.downcast::<rustls::Error>()) {
        Some(Ok(error)) => Error::Tls(error),
        Some(Err(error)) => Error::Io(io::Error::new(kind, error)),
        None => Error::Io(io::Error::new(kind, "TLS handshake failed")),
    }
}

/// Builds a connector trusting the certificates in `ca_file`, or the
/// webpki root set when no bundle is given.
pub fn build_tls_connector(ca_file: Option<&Path>) -> crate::Result<TlsConnector> {
    let mut root_cert_store = RootCertStore::empty();

    if let Some(ca_file) = ca_file {
        let mut reader = BufReader::new(File::open(ca_file).map_err(Error::CaFile)?);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::CaFile)?;
        let (added, ignored) = root_cert_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::CaFile(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no usable certificates in {}", ca_file.display()),
            )));
        }
        log::debug!(
            "Loaded {added} certificates from {} ({ignored} ignored)",
            ca_file.display()
        );
    } else {
        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| TrustAnchor {
            subject: ta.subject.clone(),
            subject_public_key_info: ta.subject_public_key_info.clone(),
            name_constraints: ta.name_constraints.clone(),
        }));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
