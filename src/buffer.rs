//! Growable byte buffer backing a connection's receive/send sides.
//!
//! Bytes already handed to a protocol parser are dropped from the front with
//! [`Buffer::consume`]; bytes still awaiting a complete message stay in the
//! unconsumed middle. `reserve` grows the tail so a `read`/`write` syscall
//! always has somewhere to land without reallocating mid-parse.

#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer { data: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Buffer {
        Buffer { data: Vec::with_capacity(cap) }
    }

    /// Unconsumed bytes currently buffered.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Read-only view of the `n` most recently written bytes, or the whole
    /// buffer when `n` is negative (mirrors the host surface's `recv_data`/
    /// `send_data(n=-1)` convention).
    pub fn data(&self, n: i64) -> &[u8] {
        if n < 0 || n as usize >= self.data.len() {
            &self.data
        } else {
            &self.data[self.data.len() - n as usize..]
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Grows the spare tail capacity by at least `additional` bytes and
    /// returns a mutable view of the whole (logical-length-unchanged) tail
    /// a `read(2)` can be issued into via `set_len`.
    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    pub fn spare_capacity(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    /// Grows the logical length by `n` bytes (caller has just written `n`
    /// bytes into the reserved tail via `spare_mut`).
    ///
    /// # Safety
    /// The caller must have initialized the `n` bytes starting at the old
    /// length via `spare_mut`.
    pub unsafe fn advance_mut(&mut self, n: usize) {
        let len = self.data.len();
        self.data.set_len(len + n);
    }

    pub fn spare_mut(&mut self) -> &mut [u8] {
        let len = self.data.len();
        let cap = self.data.capacity();
        unsafe {
            std::slice::from_raw_parts_mut(self.data.as_mut_ptr().add(len), cap - len)
        }
    }

    /// Drops the first `n` bytes, shifting the remainder to the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn consume_shifts_remainder() {
        let mut buf = Buffer::new();
        buf.extend(b"hello world");
        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");
    }

    #[test]
    fn data_tail_view() {
        let mut buf = Buffer::new();
        buf.extend(b"abcdef");
        assert_eq!(buf.data(3), b"def");
        assert_eq!(buf.data(-1), b"abcdef");
    }

    #[test]
    fn reserve_and_advance() {
        let mut buf = Buffer::new();
        buf.reserve(16);
        assert!(buf.spare_capacity() >= 16);
        let spare = buf.spare_mut();
        spare[0] = b'x';
        unsafe { buf.advance_mut(1) };
        assert_eq!(buf.as_slice(), b"x");
    }
}
