//! Binary reading and writing utilities for the arena protocol.
//!
//! All values are little-endian. Reads never panic: a short buffer yields
//! [`ProtocolError::UnexpectedEof`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;

/// A reader for parsing binary protocol messages.
#[derive(Debug)]
pub struct BinaryReader {
    buf: Bytes,
}

impl BinaryReader {
    /// Create a new reader from raw bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { buf: data.into() }
    }

    /// Returns remaining bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    fn ensure(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() >= n {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedEof)
        }
    }

    #[inline]
    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    #[inline]
    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    #[inline]
    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    #[inline]
    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    #[inline]
    pub fn get_f32(&mut self) -> Result<f32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    #[inline]
    pub fn get_f64(&mut self) -> Result<f64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64_le())
    }

    /// Fail if any bytes are left unread.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

/// A writer for building binary protocol messages.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a new writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    #[inline]
    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    /// Consume the writer and return the built buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Get current buffer as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_u64() {
        let mut w = BinaryWriter::new();
        w.put_u64(0xDEAD_BEEF_0000_0001);
        let mut r = BinaryReader::new(w.finish());
        assert_eq!(r.get_u64(), Ok(0xDEAD_BEEF_0000_0001));
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_short_read_is_error() {
        let mut r = BinaryReader::new(vec![0x01, 0x02]);
        assert_eq!(r.get_u32(), Err(ProtocolError::UnexpectedEof));
        // Nothing consumed on failure.
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn test_trailing_bytes_reported() {
        let mut r = BinaryReader::new(vec![0x01, 0x02, 0x03]);
        r.get_u8().unwrap();
        assert_eq!(r.finish(), Err(ProtocolError::TrailingBytes(2)));
    }
}
