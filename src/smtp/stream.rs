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
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

/// Connection to the submission server, before or after the TLS handshake.
#[allow(clippy::large_enum_variant)]
pub enum SmtpStream {
    Basic(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl SmtpStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, SmtpStream::Tls(_))
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Basic(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Basic(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Basic(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Basic(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Cr,
    CrLf,
    Init,
}

/// SMTP transparency procedure (RFC 5321, section 4.5.2) applied to a
/// message written in arbitrary chunks.
///
/// The line state is carried from one chunk to the next, so a leading dot is
/// escaped even when its preceding CRLF arrived in an earlier chunk.
#[derive(Debug)]
pub struct DotStuffer {
    state: State,
    written: usize,
}

impl Default for DotStuffer {
    fn default() -> Self {
        DotStuffer {
            state: State::CrLf,
            written: 0,
        }
    }
}

impl DotStuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the next chunk of the message.
    pub async fn write_chunk<W: AsyncWrite + Unpin>(
        &mut self,
        stream: &mut W,
        chunk: &[u8],
    ) -> io::Result<()> {
        let mut last_pos = 0;
        for (pos, byte) in chunk.iter().enumerate() {
            if *byte == b'.' && self.state == State::CrLf {
                if let Some(bytes) = chunk.get(last_pos..pos) {
                    stream.write_all(bytes).await?;
                    stream.write_all(b".").await?;
                    last_pos = pos;
                }
                self.state = State::Init;
            } else if *byte == b'\r' {
                self.state = State::Cr;
            } else if *byte == b'\n' && self.state == State::Cr {
                self.state = State::CrLf;
            } else {
                self.state = State::Init;
            }
        }
        if let Some(bytes) = chunk.get(last_pos..) {
            stream.write_all(bytes).await?;
        }
        self.written += chunk.len();
        Ok(())
    }

    /// Writes the end-of-data indicator.
    pub async fn finish<W: AsyncWrite + Unpin>(self, stream: &mut W) -> io::Result<()> {
        if self.state == State::CrLf && self.written > 0 {
            stream.write_all(b".\r\n").await?;
        } else {
            stream.write_all(b"\r\n.\r\n").await?;
        }
        stream.flush().await
    }

    /// Number of message bytes consumed so far, before escaping.
    pub fn written(&self) -> usize {
        self.written
    }
}
