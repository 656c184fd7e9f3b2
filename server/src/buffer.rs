// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Growable byte queue with read/write cursors.
//!
//! The readable range is `[read_idx, write_idx)`, the writable tail is
//! `[write_idx, capacity)`. Appends first try the tail, then compact the
//! readable bytes to offset 0, and only grow as a last resort, so a
//! connection that keeps up with its peer never reallocates.

const DEFAULT_CAPACITY: usize = 1024;

/// A contiguous, growable byte buffer with separate read and write cursors.
#[derive(Debug)]
pub struct Buffer {
    buf: Vec<u8>,
    read_idx: usize,
    write_idx: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Creates a buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a buffer with at least `capacity` bytes of writable space.
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            buf: vec![0; capacity],
            read_idx: 0,
            write_idx: 0,
        }
    }

    /// The readable bytes, in FIFO order.
    pub fn readable(&self) -> &[u8] {
        &self.buf[self.read_idx..self.write_idx]
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        self.write_idx - self.read_idx
    }

    /// Whether there is nothing left to read.
    pub fn is_empty(&self) -> bool {
        self.read_idx == self.write_idx
    }

    /// Total allocated capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Reclaimable space in front of the read cursor.
    pub fn head_capacity(&self) -> usize {
        self.read_idx
    }

    /// Writable space behind the write cursor.
    pub fn tail_capacity(&self) -> usize {
        self.buf.len() - self.write_idx
    }

    /// Makes room for `n` more bytes: a no-op if the tail suffices, a compact
    /// if head plus tail suffice, otherwise a grow to `write_idx + n`.
    /// Readable bytes survive either way, in order.
    pub fn ensure_writable(&mut self, n: usize) {
        if n <= self.tail_capacity() {
            return;
        }
        if n <= self.head_capacity() + self.tail_capacity() {
            let len = self.len();
            self.buf.copy_within(self.read_idx..self.write_idx, 0);
            self.read_idx = 0;
            self.write_idx = len;
        } else {
            self.buf.resize(self.write_idx + n, 0);
        }
    }

    /// Appends bytes.
    pub fn push(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.ensure_writable(data.len());
        self.buf[self.write_idx..self.write_idx + data.len()].copy_from_slice(data);
        self.write_idx += data.len();
    }

    /// Appends a string.
    pub fn push_str(&mut self, data: &str) {
        self.push(data.as_bytes());
    }

    /// Appends another buffer's readable bytes. The source is not consumed.
    pub fn push_buffer(&mut self, other: &Buffer) {
        self.push(other.readable());
    }

    /// Drops `n` bytes from the front. Dropping more than is readable is a
    /// programming error.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consumed past the readable range");
        self.read_idx += n;
    }

    /// Copies out and consumes `n` bytes.
    pub fn read_out(&mut self, n: usize) -> Vec<u8> {
        assert!(n <= self.len(), "read past the readable range");
        let out = self.buf[self.read_idx..self.read_idx + n].to_vec();
        self.read_idx += n;
        out
    }

    /// Copies out and consumes `n` bytes as a string, replacing any invalid
    /// UTF-8 sequences.
    pub fn read_string(&mut self, n: usize) -> String {
        let bytes = self.read_out(n);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// The first line of the readable range, up to and including the first
    /// `\n`, without consuming it. `None` if no newline has arrived yet.
    pub fn peek_line(&self) -> Option<&[u8]> {
        let readable = self.readable();
        let pos = readable.iter().position(|&b| b == b'\n')?;
        Some(&readable[..=pos])
    }

    /// Pops the first line, up to and including the first `\n`.
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let len = self.peek_line()?.len();
        Some(self.read_out(len))
    }

    /// Discards everything and rewinds both cursors.
    pub fn clear(&mut self) {
        self.read_idx = 0;
        self.write_idx = 0;
    }
}

#[cfg(test)]
mod test {
    use super::Buffer;

    #[test]
    fn push_then_read_round_trips_in_order() {
        let mut buf = Buffer::new();
        buf.push(b"hello ");
        buf.push(b"world");
        assert_eq!(b"hello world", buf.readable());
        assert_eq!(b"hello".to_vec(), buf.read_out(5));
        buf.push(b"!");
        assert_eq!(b" world!", buf.readable());
    }

    #[test]
    fn compacts_instead_of_reallocating() {
        let mut buf = Buffer::with_capacity(1024);
        buf.push(&[b'A'; 1000]);
        buf.consume(900);
        buf.push(&[b'B'; 500]);

        assert_eq!(1024, buf.capacity());
        assert_eq!(0, buf.head_capacity());
        assert_eq!(600, buf.len());
        assert!(buf.readable()[..100].iter().all(|&b| b == b'A'));
        assert!(buf.readable()[100..].iter().all(|&b| b == b'B'));
    }

    #[test]
    fn grows_when_head_and_tail_are_insufficient() {
        let mut buf = Buffer::with_capacity(16);
        buf.push(b"0123456789abcdef");
        buf.consume(4);
        buf.push(b"xyz");
        assert_eq!(b"456789abcdefxyz", buf.readable());
    }

    #[test]
    fn ensure_writable_preserves_readable_bytes() {
        let mut buf = Buffer::with_capacity(8);
        buf.push(b"abc");
        buf.consume(1);
        buf.ensure_writable(64);
        assert!(buf.tail_capacity() >= 64);
        assert_eq!(b"bc", buf.readable());
    }

    #[test]
    fn line_scan_stops_at_first_newline() {
        let mut buf = Buffer::new();
        buf.push_str("GET / HTTP/1.1\r\nHost: x\r\n");
        assert_eq!(b"GET / HTTP/1.1\r\n".to_vec(), buf.take_line().unwrap());
        assert_eq!(b"Host: x\r\n".to_vec(), buf.take_line().unwrap());
        assert_eq!(None, buf.take_line());
    }

    #[test]
    fn peek_line_does_not_consume() {
        let mut buf = Buffer::new();
        buf.push_str("a\nb\n");
        assert_eq!(b"a\n", buf.peek_line().unwrap());
        assert_eq!(b"a\n", buf.peek_line().unwrap());
        assert_eq!(4, buf.len());
    }

    #[test]
    fn push_buffer_appends_the_source_once_without_consuming_it() {
        let mut src = Buffer::new();
        src.push(b"abc");
        src.consume(1);
        let mut dst = Buffer::new();
        dst.push(b"xy");
        dst.push_buffer(&src);
        assert_eq!(b"xybc", dst.readable());
        assert_eq!(b"bc", src.readable());
    }

    #[test]
    fn clear_rewinds_both_cursors() {
        let mut buf = Buffer::new();
        buf.push(b"data");
        buf.consume(2);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(0, buf.head_capacity());
        assert_eq!(buf.capacity(), buf.tail_capacity());
    }

    #[test]
    fn strings_with_embedded_nuls_survive() {
        let mut buf = Buffer::new();
        buf.push_str("a\0b\0c");
        assert_eq!("a\0b\0c", buf.read_string(5));
    }

    #[test]
    #[should_panic(expected = "consumed past")]
    fn over_consume_is_a_programming_error() {
        let mut buf = Buffer::new();
        buf.push(b"ab");
        buf.consume(3);
    }
}
