//! Deterministic little-endian record codecs.
//!
//! Every record persisted by the chain database has a byte-exact layout, so
//! encoding is done by hand against a growable buffer rather than through a
//! serialization framework.

use crate::error::{ChainError, ChainResult};
use crate::primitives::Hash;

/// Growable byte sink for record encodings.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_hash(&mut self, v: &Hash) {
        self.buf.extend_from_slice(v);
    }

    #[inline]
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Length-prefixed byte string (u16 length).
    pub fn put_var_bytes(&mut self, v: &[u8]) {
        debug_assert!(v.len() <= u16::MAX as usize);
        self.put_u16(v.len() as u16);
        self.put_bytes(v);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an encoded record.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    record: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], record: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            record,
        }
    }

    fn truncated(&self) -> ChainError {
        ChainError::CorruptRecord {
            record: self.record,
            reason: "truncated",
        }
    }

    pub fn corrupt(&self, reason: &'static str) -> ChainError {
        ChainError::CorruptRecord {
            record: self.record,
            reason,
        }
    }

    fn take(&mut self, n: usize) -> ChainResult<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(self.truncated());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> ChainResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> ChainResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> ChainResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> ChainResult<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn get_i32(&mut self) -> ChainResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_hash(&mut self) -> ChainResult<Hash> {
        let b = self.take(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(b);
        Ok(hash)
    }

    pub fn get_bytes(&mut self, n: usize) -> ChainResult<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Length-prefixed byte string (u16 length).
    pub fn get_var_bytes(&mut self) -> ChainResult<Vec<u8>> {
        let len = self.get_u16()? as usize;
        self.get_bytes(len)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fails when trailing bytes remain after a full decode.
    pub fn finish(&self) -> ChainResult<()> {
        if self.remaining() != 0 {
            return Err(self.corrupt("trailing bytes"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars() {
        let mut w = Writer::new();
        w.put_u8(0xab);
        w.put_u16(0x1234);
        w.put_u32(0xdead_beef);
        w.put_u64(u64::MAX - 7);
        w.put_i32(-42);
        w.put_var_bytes(b"name");
        let buf = w.into_vec();

        let mut r = Reader::new(&buf, "test");
        assert_eq!(r.get_u8().unwrap(), 0xab);
        assert_eq!(r.get_u16().unwrap(), 0x1234);
        assert_eq!(r.get_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.get_u64().unwrap(), u64::MAX - 7);
        assert_eq!(r.get_i32().unwrap(), -42);
        assert_eq!(r.get_var_bytes().unwrap(), b"name");
        r.finish().unwrap();
    }

    #[test]
    fn truncated_read_errors() {
        let buf = [0u8; 3];
        let mut r = Reader::new(&buf, "test");
        let err = r.get_u32().unwrap_err();
        match err {
            ChainError::CorruptRecord { record, reason } => {
                assert_eq!(record, "test");
                assert_eq!(reason, "truncated");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let buf = [1u8, 2, 3];
        let mut r = Reader::new(&buf, "test");
        r.get_u8().unwrap();
        assert!(r.finish().is_err());
    }
}
