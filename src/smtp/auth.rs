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

use std::fmt::Display;

use base64::{engine::general_purpose::STANDARD, Engine};
#[cfg(feature = "cram-md5")]
use smtp_proto::AUTH_CRAM_MD5;
use smtp_proto::{EhloResponse, AUTH_LOGIN, AUTH_PLAIN};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

/// Username and secret used to authenticate a submission.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChallenge,
}

#[cfg(feature = "cram-md5")]
const MECHANISMS: &[u64] = &[AUTH_CRAM_MD5, AUTH_LOGIN, AUTH_PLAIN];
#[cfg(not(feature = "cram-md5"))]
const MECHANISMS: &[u64] = &[AUTH_LOGIN, AUTH_PLAIN];

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Authenticates using the most secure mechanism advertised by the server.
    pub async fn authenticate(
        &mut self,
        credentials: &Credentials,
        capabilities: &EhloResponse<String>,
    ) -> crate::Result<&mut Self> {
        let mut has_err = None;

        for &mechanism in MECHANISMS {
            if capabilities.auth_mechanisms & mechanism == 0 {
                continue;
            }
            match self.auth(mechanism, credentials).await {
                Ok(_) => return Ok(self),
                Err(err) => match err {
                    crate::Error::UnexpectedReply(reply) => {
                        has_err = reply.into();
                    }
                    crate::Error::UnsupportedAuthMechanism => (),
                    _ => return Err(err),
                },
            }
        }

        if let Some(has_err) = has_err {
            Err(crate::Error::AuthenticationFailed(has_err))
        } else {
            Err(crate::Error::UnsupportedAuthMechanism)
        }
    }

    pub(crate) async fn auth(
        &mut self,
        mechanism: u64,
        credentials: &Credentials,
    ) -> crate::Result<()> {
        let name = mechanism_name(mechanism)?;
        let mut reply = if mechanism == AUTH_PLAIN {
            self.cmd_redacted(
                format!("AUTH {} {}\r\n", name, credentials.encode(mechanism, "")?),
                &format!("AUTH {name} <credentials>"),
            )
            .await?
        } else {
            self.cmd(format!("AUTH {name}\r\n").as_bytes()).await?
        };

        for _ in 0..3 {
            match reply.code() {
                334 => {
                    reply = self
                        .cmd_redacted(
                            format!("{}\r\n", credentials.encode(mechanism, reply.message())?),
                            "<credentials>",
                        )
                        .await?;
                }
                235 => {
                    return Ok(());
                }
                _ => {
                    return Err(crate::Error::UnexpectedReply(reply));
                }
            }
        }

        Err(crate::Error::UnexpectedReply(reply))
    }
}

fn mechanism_name(mechanism: u64) -> crate::Result<&'static str> {
    match mechanism {
        AUTH_PLAIN => Ok("PLAIN"),
        AUTH_LOGIN => Ok("LOGIN"),
        #[cfg(feature = "cram-md5")]
        AUTH_CRAM_MD5 => Ok("CRAM-MD5"),
        _ => Err(crate::Error::UnsupportedAuthMechanism),
    }
}

impl Credentials {
    /// Creates a new `Credentials` instance.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Credentials {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn encode(&self, mechanism: u64, challenge: &str) -> crate::Result<String> {
        Ok(STANDARD.encode(
            match mechanism {
                AUTH_PLAIN => {
                    format!("\u{0}{}\u{0}{}", self.username, self.secret)
                }

                AUTH_LOGIN => {
                    let challenge = STANDARD.decode(challenge.trim())?;
                    let starts_with = |prefix: &[u8]| {
                        challenge
                            .get(..prefix.len())
                            .is_some_and(|start| start.eq_ignore_ascii_case(prefix))
                    };

                    // Google asks for "Username"
                    if starts_with(b"user name") || starts_with(b"username") {
                        &self.username
                    } else if starts_with(b"password") {
                        &self.secret
                    } else {
                        return Err(Error::InvalidChallenge.into());
                    }
                    .to_string()
                }

                #[cfg(feature = "cram-md5")]
                AUTH_CRAM_MD5 => {
                    let mut secret_opad: Vec<u8> = vec![0x5c; 64];
                    let mut secret_ipad: Vec<u8> = vec![0x36; 64];

                    if self.secret.len() < 64 {
                        for (pos, byte) in self.secret.as_bytes().iter().enumerate() {
                            secret_opad[pos] = *byte ^ 0x5c;
                            secret_ipad[pos] = *byte ^ 0x36;
                        }
                    } else {
                        for (pos, byte) in md5::compute(self.secret.as_bytes()).iter().enumerate() {
                            secret_opad[pos] = *byte ^ 0x5c;
                            secret_ipad[pos] = *byte ^ 0x36;
                        }
                    }

                    secret_ipad.extend_from_slice(&STANDARD.decode(challenge.trim())?);
                    secret_opad.extend_from_slice(&md5::compute(&secret_ipad).0);

                    format!("{} {:x}", self.username, md5::compute(&secret_opad))
                }

                _ => return Err(crate::Error::UnsupportedAuthMechanism),
            }
            .as_bytes(),
        ))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChallenge => write!(f, "Invalid challenge"),
        }
    }
}
