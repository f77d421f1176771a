// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

/// Grow-on-demand byte buffer used to accumulate partial reads from a socket
/// until a complete header or chunk is available. Connections here can carry
/// arbitrarily large domain names and chunk payloads, so this buffer grows
/// its backing `Vec` as needed instead of rejecting oversized input at the
/// buffer layer -- size limits are enforced by the parsers that consume it.
#[derive(Default)]
pub struct Buffer {
    data: Vec<u8>,
    /// Bytes at the front of `data` already consumed by a parser.
    consumed: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: Vec::new(), consumed: 0 }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), consumed: 0 }
    }

    /// Unconsumed bytes currently held.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.consumed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append freshly-read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.reclaim_if_worthwhile();
        self.data.extend_from_slice(bytes);
    }

    /// Mark `n` bytes at the front as consumed, e.g. after a parser has
    /// successfully extracted a header or chunk.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.len(), "advance past end of buffer");
        self.consumed += n;
    }

    /// Compact away already-consumed bytes once they dominate the
    /// allocation, so a long-lived connection buffer doesn't grow without
    /// bound purely from bookkeeping.
    fn reclaim_if_worthwhile(&mut self) {
        if self.consumed > 0 && (self.consumed >= self.data.len() / 2 || self.consumed > 4096) {
            self.data.drain(0..self.consumed);
            self.consumed = 0;
        }
    }

    /// Reserve space and expose it as a mutable slice for a direct socket
    /// read, then commit the number of bytes actually read.
    pub fn read_chunk_into<F>(&mut self, max: usize, read_fn: F) -> std::io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> std::io::Result<usize>,
    {
        self.reclaim_if_worthwhile();
        let start = self.data.len();
        self.data.resize(start + max, 0);
        let n = read_fn(&mut self.data[start..])?;
        self.data.truncate(start + n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_then_advance_exposes_remaining_tail() {
        let mut buf = Buffer::new();
        buf.extend(b"hello world");
        buf.advance(6);
        assert_eq!(buf.unread(), b"world");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn grows_past_any_fixed_capacity() {
        let mut buf = Buffer::with_capacity(4);
        let long = vec![0x41u8; 10_000];
        buf.extend(&long);
        assert_eq!(buf.len(), 10_000);
    }

    #[test]
    fn reclaims_consumed_prefix_on_large_advance() {
        let mut buf = Buffer::new();
        buf.extend(&vec![1u8; 5000]);
        buf.advance(5000);
        buf.extend(b"tail");
        assert_eq!(buf.unread(), b"tail");
    }
}
