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

//! Wire payload construction.
//!
//! The payload is a CRLF-terminated header block, a blank CRLF line and the
//! raw body:
//!
//! ```text
//! To: <rcpt1> <rcpt2> \r\n
//! From: <sender>\r\n
//! Cc: <cc1> \r\n
//! Message ID: <id>\r\n
//! Subject: subject\r\n
//! Content-Type: content-type\r\n
//! \r\n
//! body
//! ```

use std::{
    fmt::Display,
    ops::Deref,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Default content type of a message body.
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset = \"UTF-8\"";

/// Content type set when an HTML document is embedded in the body.
pub const CONTENT_TYPE_HTML: &str = "text/html; charset=\"UTF-8\"";

const TO: &str = "To: ";
const FROM: &str = "From: <";
const CC: &str = "Cc: ";
const MESSAGE_ID: &str = "Message ID: <";
const SUBJECT: &str = "Subject: ";
const CONTENT_TYPE: &str = "Content-Type: ";
const CRLF: &str = "\r\n";

/// Fields of an outgoing message.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageSpec<'x> {
    pub from: &'x str,
    pub to: &'x [String],
    pub cc: &'x [String],
    pub subject: &'x str,
    pub content_type: &'x str,
    pub body: &'x str,
}

/// Identifier of a single outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

/// Immutable wire payload of one send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBuffer {
    bytes: Box<[u8]>,
    message_id: MessageId,
}

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

impl MessageId {
    /// Generates a new identifier from the current time and the sender address.
    ///
    /// Timestamps are strictly increasing within the process, so no two
    /// identifiers generated for the same sender are ever equal.
    pub fn generate(sender: &str) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
        let timestamp = loop {
            let next = now.max(last + 1);
            match LAST_TIMESTAMP.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(current) => last = current,
            }
        };
        MessageId(format!("{timestamp}{sender}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'x> MessageSpec<'x> {
    pub fn new(from: &'x str, to: &'x [String]) -> Self {
        MessageSpec {
            from,
            to,
            cc: &[],
            subject: "",
            content_type: CONTENT_TYPE_TEXT,
            body: "",
        }
    }

    pub fn cc(mut self, cc: &'x [String]) -> Self {
        self.cc = cc;
        self
    }

    pub fn subject(mut self, subject: &'x str) -> Self {
        self.subject = subject;
        self
    }

    pub fn content_type(mut self, content_type: &'x str) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn body(mut self, body: &'x str) -> Self {
        self.body = body;
        self
    }

    /// Exact length in bytes of the payload built with `id`.
    pub fn wire_len(&self, id: &MessageId) -> usize {
        let addresses = |list: &[String]| list.iter().map(|addr| addr.len() + 3).sum::<usize>();

        TO.len()
            + addresses(self.to)
            + CRLF.len()
            + FROM.len()
            + self.from.len()
            + 1
            + CRLF.len()
            + CC.len()
            + addresses(self.cc)
            + CRLF.len()
            + MESSAGE_ID.len()
            + id.0.len()
            + 1
            + CRLF.len()
            + SUBJECT.len()
            + self.subject.len()
            + CRLF.len()
            + CONTENT_TYPE.len()
            + self.content_type.len()
            + CRLF.len()
            + CRLF.len()
            + self.body.len()
    }

    pub(crate) fn write_with_id(&self, message_id: MessageId) -> WireBuffer {
        let capacity = self.wire_len(&message_id);
        let mut buf = Vec::with_capacity(capacity);

        let write_addresses = |buf: &mut Vec<u8>, list: &[String]| {
            for addr in list {
                buf.push(b'<');
                buf.extend_from_slice(addr.as_bytes());
                buf.extend_from_slice(b"> ");
            }
            buf.extend_from_slice(CRLF.as_bytes());
        };

        buf.extend_from_slice(TO.as_bytes());
        write_addresses(&mut buf, self.to);
        buf.extend_from_slice(FROM.as_bytes());
        buf.extend_from_slice(self.from.as_bytes());
        buf.push(b'>');
        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(CC.as_bytes());
        write_addresses(&mut buf, self.cc);
        buf.extend_from_slice(MESSAGE_ID.as_bytes());
        buf.extend_from_slice(message_id.0.as_bytes());
        buf.push(b'>');
        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(SUBJECT.as_bytes());
        buf.extend_from_slice(self.subject.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(CONTENT_TYPE.as_bytes());
        buf.extend_from_slice(self.content_type.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(self.body.as_bytes());

        debug_assert_eq!(buf.len(), capacity);

        WireBuffer {
            bytes: buf.into_boxed_slice(),
            message_id,
        }
    }
}

/// Builds the wire payload of a message, generating a fresh message identifier.
pub fn build(spec: &MessageSpec<'_>) -> WireBuffer {
    spec.write_with_id(MessageId::generate(spec.from))
}

impl WireBuffer {
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Deref for WireBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl AsRef<[u8]> for WireBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod test {
    use super::{build, MessageId, MessageSpec, CONTENT_TYPE_HTML, CONTENT_TYPE_TEXT};

    fn find(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
        haystack
            .windows(needle.len())
            .enumerate()
            .filter_map(|(pos, window)| (window == needle).then_some(pos))
            .collect()
    }

    #[test]
    fn build_simple_message() {
        let to = vec!["b@x.com".to_string()];
        let spec = MessageSpec::new("a@x.com", &to)
            .subject("Hi")
            .body("hello");
        let message = build(&spec);

        assert!(message.starts_with(b"To: <b@x.com> \r\n"));
        assert!(message.ends_with(b"\r\n\r\nhello"));
        assert_eq!(
            String::from_utf8(message.to_vec()).unwrap(),
            format!(
                concat!(
                    "To: <b@x.com> \r\n",
                    "From: <a@x.com>\r\n",
                    "Cc: \r\n",
                    "Message ID: <{}>\r\n",
                    "Subject: Hi\r\n",
                    "Content-Type: text/plain; charset = \"UTF-8\"\r\n",
                    "\r\n",
                    "hello"
                ),
                message.message_id()
            )
        );
    }

    #[test]
    fn recipients_in_order() {
        let to = vec!["one@x.com".to_string(), "two@x.com".to_string()];
        let cc = vec!["three@x.com".to_string(), "four@x.com".to_string()];
        let spec = MessageSpec::new("a@x.com", &to).cc(&cc).body("body");
        let message = build(&spec);

        assert!(message.starts_with(b"To: <one@x.com> <two@x.com> \r\nFrom: <a@x.com>\r\n"));
        assert_eq!(find(&message, b"Cc: <three@x.com> <four@x.com> \r\n").len(), 1);
        for addr in to.iter().chain(cc.iter()) {
            assert_eq!(find(&message, format!("<{addr}>").as_bytes()).len(), 1);
        }
    }

    #[test]
    fn single_separator_and_verbatim_body() {
        let to = vec!["b@x.com".to_string()];
        let body = "line one\nline two\0with nul\n.\nend";
        let spec = MessageSpec::new("a@x.com", &to)
            .subject("Test")
            .body(body);
        let message = build(&spec);

        let separators = find(&message, b"\r\n\r\n");
        assert_eq!(separators.len(), 1);
        assert_eq!(&message[separators[0] + 4..], body.as_bytes());
    }

    #[test]
    fn exact_length() {
        let to = vec!["b@x.com".to_string(), "c@example.org".to_string()];
        let cc = vec!["d@x.com".to_string()];
        for (cc, subject, body) in [
            (&[][..], "", ""),
            (&cc[..], "Subject", "Body"),
            (&cc[..], "Ünïcödé", "Ünïcödé body\r\n"),
        ] {
            let spec = MessageSpec::new("a@x.com", &to)
                .cc(cc)
                .subject(subject)
                .body(body);
            let id = MessageId::generate(spec.from);
            let expected = spec.wire_len(&id);
            assert_eq!(spec.write_with_id(id).len(), expected);
        }
    }

    #[test]
    fn content_type_termination() {
        let to = vec!["b@x.com".to_string()];

        let message = build(&MessageSpec::new("a@x.com", &to).content_type(CONTENT_TYPE_TEXT));
        assert!(message.ends_with(b"Content-Type: text/plain; charset = \"UTF-8\"\r\n\r\n"));

        let message = build(&MessageSpec::new("a@x.com", &to).content_type(CONTENT_TYPE_HTML));
        assert!(message.ends_with(b"Content-Type: text/html; charset=\"UTF-8\"\r\n\r\n"));

        // Not deduplicated when the content type already carries a CRLF
        let legacy = format!("{CONTENT_TYPE_HTML}\r\n");
        let message = build(&MessageSpec::new("a@x.com", &to).content_type(&legacy));
        assert!(message.ends_with(b"Content-Type: text/html; charset=\"UTF-8\"\r\n\r\n\r\n"));
    }

    #[test]
    fn unique_message_ids() {
        let to = vec!["b@x.com".to_string()];
        let spec = MessageSpec::new("a@x.com", &to).subject("Hi").body("hello");
        let first = build(&spec);
        let second = build(&spec);

        assert_ne!(first.message_id(), second.message_id());
        assert_ne!(first, second);
        assert!(first.message_id().as_str().ends_with("a@x.com"));
    }
}
