//! Bounded tail buffer for slot output.
//!
//! Keeps only the most recent `max` bytes, so a chatty worker can never
//! exhaust memory; captures only ever need the visible tail anyway.

use std::collections::VecDeque;

/// Default capacity: 64 KiB is far more than any readiness heuristic reads.
pub const DEFAULT_TAIL_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub struct TailBuffer {
    bytes: VecDeque<u8>,
    max: usize,
}

impl TailBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TAIL_BYTES)
    }

    pub fn with_capacity(max: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(max.min(4096)),
            max,
        }
    }

    /// Append data, evicting the oldest bytes beyond capacity.
    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.max {
            self.bytes.clear();
            self.bytes.extend(&data[data.len() - self.max..]);
            return;
        }
        let overflow = (self.bytes.len() + data.len()).saturating_sub(self.max);
        if overflow > 0 {
            self.bytes.drain(0..overflow);
        }
        self.bytes.extend(data);
    }

    /// The buffered tail as a lossy UTF-8 string.
    pub fn tail(&self) -> String {
        let (a, b) = self.bytes.as_slices();
        let mut data = Vec::with_capacity(self.bytes.len());
        data.extend_from_slice(a);
        data.extend_from_slice(b);
        String::from_utf8_lossy(&data).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for TailBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_tail() {
        let mut buf = TailBuffer::with_capacity(16);
        buf.push(b"hello ");
        buf.push(b"world");
        assert_eq!(buf.tail(), "hello world");
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let mut buf = TailBuffer::with_capacity(8);
        buf.push(b"12345678");
        buf.push(b"abcd");
        assert_eq!(buf.tail(), "5678abcd");
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_oversized_chunk_truncated_to_tail() {
        let mut buf = TailBuffer::with_capacity(4);
        buf.push(b"abcdefgh");
        assert_eq!(buf.tail(), "efgh");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut buf = TailBuffer::with_capacity(16);
        buf.push(&[0xFF, b'o', b'k']);
        assert!(buf.tail().contains("ok"));
    }
}
