/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{transport::ReadCallback, SmtpClient};

use super::{stream::DotStuffer, AssertReply};

/// Size of the buffer handed to the message source on each pull.
pub const DATA_CHUNK_SIZE: usize = 16 * 1024;

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a MAIL FROM command to the server.
    pub async fn mail_from(&mut self, addr: &str) -> crate::Result<()> {
        self.cmd(format!("MAIL FROM:<{addr}>\r\n").as_bytes())
            .await?
            .assert_positive_completion()
    }

    /// Sends a RCPT TO command to the server.
    pub async fn rcpt_to(&mut self, addr: &str) -> crate::Result<()> {
        self.cmd(format!("RCPT TO:<{addr}>\r\n").as_bytes())
            .await?
            .assert_positive_completion()
    }

    /// Sends a DATA command to the server, then streams the message pulled
    /// from `source` until it returns zero bytes.
    pub async fn data_from(&mut self, source: &mut ReadCallback<'_>) -> crate::Result<usize> {
        self.cmd(b"DATA\r\n").await?.assert_code(354)?;
        let written = tokio::time::timeout(self.timeout, async {
            let mut buf = vec![0u8; DATA_CHUNK_SIZE];
            let mut stuffer = DotStuffer::new();

            loop {
                let len = source(&mut buf[..]).min(buf.len());
                if len == 0 {
                    break;
                }
                stuffer.write_chunk(&mut self.stream, &buf[..len]).await?;
            }

            let written = stuffer.written();
            stuffer.finish(&mut self.stream).await?;
            self.log_command(&format!("<{written} bytes of message data>"));
            self.read().await?.assert_positive_completion()?;
            Ok::<_, crate::Error>(written)
        })
        .await
        .map_err(|_| crate::Error::Timeout)??;

        Ok(written)
    }

    /// Sends a DATA command to the server with the whole message at once.
    pub async fn data(&mut self, message: impl AsRef<[u8]>) -> crate::Result<usize> {
        let mut cursor = crate::StreamCursor::new(message.as_ref());
        self.data_from(&mut |buf: &mut [u8]| cursor.fill(buf)).await
    }

    /// Sends a RSET command to the server.
    pub async fn rset(&mut self) -> crate::Result<()> {
        self.cmd(b"RSET\r\n").await?.assert_positive_completion()
    }

    /// Sends a QUIT command to the server.
    pub async fn quit(mut self) -> crate::Result<()> {
        self.cmd(b"QUIT\r\n").await?.assert_positive_completion()?;
        self.stream.shutdown().await.ok();
        Ok(())
    }
}
