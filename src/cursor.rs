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

use std::io::Read;

/// One-shot read cursor over a built payload.
///
/// Each call hands out the next bytes after the ones already delivered. The
/// remaining length is always `len - offset`, so payloads containing NUL or
/// any other byte value are delivered in full.
#[derive(Debug)]
pub struct StreamCursor<'x> {
    buffer: &'x [u8],
    offset: usize,
}

impl<'x> StreamCursor<'x> {
    pub fn new(buffer: &'x [u8]) -> Self {
        StreamCursor { buffer, offset: 0 }
    }

    /// Returns up to `capacity` bytes starting at the current offset and
    /// advances past them. An empty slice signals exhaustion.
    pub fn pull(&mut self, capacity: usize) -> &'x [u8] {
        let remaining = &self.buffer[self.offset..];
        let chunk = &remaining[..capacity.min(remaining.len())];
        self.offset += chunk.len();
        chunk
    }

    /// Copies the next bytes into `dst`, returning how many were written.
    pub fn fill(&mut self, dst: &mut [u8]) -> usize {
        let chunk = self.pull(dst.len());
        dst[..chunk.len()].copy_from_slice(chunk);
        chunk.len()
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset == self.buffer.len()
    }
}

impl Read for StreamCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.fill(buf))
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::StreamCursor;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|n| (n % 251) as u8).collect()
    }

    #[test]
    fn pull_until_exhausted() {
        for len in [0, 1, 2, 7, 64, 1000] {
            let buffer = payload(len);
            for capacity in [1, 2, 3, 16, 999, 1000, 4096] {
                let mut cursor = StreamCursor::new(&buffer);
                let mut output = Vec::with_capacity(len);
                loop {
                    let chunk = cursor.pull(capacity);
                    assert!(chunk.len() <= capacity);
                    if chunk.is_empty() {
                        break;
                    }
                    output.extend_from_slice(chunk);
                }
                assert_eq!(output, buffer, "len {len} capacity {capacity}");
                assert!(cursor.is_exhausted());
                for _ in 0..3 {
                    assert!(cursor.pull(capacity).is_empty());
                }
            }
        }
    }

    #[test]
    fn zero_capacity() {
        let buffer = payload(10);
        let mut cursor = StreamCursor::new(&buffer);
        assert!(cursor.pull(0).is_empty());
        assert_eq!(cursor.position(), 0);
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.fill(&mut []), 0);
        assert_eq!(cursor.remaining(), 10);
    }

    #[test]
    fn embedded_nul_bytes() {
        let buffer = b"To: <a@b.c> \r\n\r\nbefore\0after\0\0end".to_vec();
        let mut cursor = StreamCursor::new(&buffer);
        let mut output = Vec::new();
        let mut chunk = [0u8; 5];
        loop {
            let len = cursor.fill(&mut chunk);
            if len == 0 {
                break;
            }
            output.extend_from_slice(&chunk[..len]);
        }
        assert_eq!(output, buffer);
    }

    #[test]
    fn offset_is_monotonic() {
        let buffer = payload(100);
        let mut cursor = StreamCursor::new(&buffer);
        let mut last = 0;
        for capacity in [0, 10, 0, 1, 50, 3, 100, 100] {
            cursor.pull(capacity);
            assert!(cursor.position() >= last);
            assert_eq!(cursor.position() + cursor.remaining(), buffer.len());
            last = cursor.position();
        }
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn read_to_end() {
        let buffer = payload(70_000);
        let mut output = Vec::new();
        StreamCursor::new(&buffer).read_to_end(&mut output).unwrap();
        assert_eq!(output, buffer);
    }
}
