/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use smtp_proto::{response::parser::ResponseReceiver, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    pub(crate) async fn read(&mut self) -> crate::Result<Response<String>> {
        let mut buf = vec![0u8; 1024];
        let mut parser = ResponseReceiver::default();

        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::UnparseableReply);
            }

            match parser.parse(&mut buf[..br].iter()) {
                Ok(reply) => {
                    self.log_reply(&reply);
                    return Ok(reply);
                }
                Err(err) => match err {
                    smtp_proto::Error::NeedsMoreData { .. } => (),
                    _ => {
                        return Err(crate::Error::UnparseableReply);
                    }
                },
            }
        }
    }

    /// Sends a command to the SMTP server and waits for a reply.
    pub async fn cmd(&mut self, cmd: impl AsRef<[u8]>) -> crate::Result<Response<String>> {
        let cmd = cmd.as_ref();
        self.log_command(&String::from_utf8_lossy(cmd));
        self.send_and_read(cmd).await
    }

    /// Sends a command carrying secrets, keeping them out of the protocol log.
    pub(crate) async fn cmd_redacted(
        &mut self,
        cmd: impl AsRef<[u8]>,
        shown: &str,
    ) -> crate::Result<Response<String>> {
        self.log_command(shown);
        self.send_and_read(cmd.as_ref()).await
    }

    async fn send_and_read(&mut self, cmd: &[u8]) -> crate::Result<Response<String>> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(cmd).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    pub(crate) fn log_command(&self, cmd: &str) {
        let cmd = cmd.trim_end();
        if self.verbose {
            log::info!("> {cmd}");
        } else {
            log::trace!("> {cmd}");
        }
    }

    pub(crate) fn log_reply(&self, reply: &Response<String>) {
        if self.verbose {
            log::info!("< {} {}", reply.code(), reply.message());
        } else {
            log::trace!("< {} {}", reply.code(), reply.message());
        }
    }
}
