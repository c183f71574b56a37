//! Big-endian byte decoder.

use crate::error::{CodecError, CodecResult};

/// A cursor over encoded bytes.
///
/// Every read checks bounds and fails with [`CodecError::UnexpectedEof`]
/// instead of panicking on truncated input.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Create a new decoder for the given bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Check if all bytes have been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Current read position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get remaining bytes.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Reads one byte.
    #[inline]
    pub fn u8(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Reads `len` raw bytes.
    #[inline]
    pub fn raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.raw(N)?);
        Ok(out)
    }

    /// Reads a 2-byte unsigned integer.
    pub fn u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    /// Reads a 4-byte unsigned integer.
    pub fn u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// Reads an 8-byte signed integer.
    pub fn i64(&mut self) -> CodecResult<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// Reads an 8-byte float.
    pub fn f64(&mut self) -> CodecResult<f64> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// Reads bytes prefixed by a 1-byte length.
    pub fn bytes8(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.u8()? as usize;
        self.raw(len)
    }

    /// Reads bytes prefixed by a 2-byte length.
    pub fn bytes16(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.u16()? as usize;
        self.raw(len)
    }

    /// Reads bytes prefixed by a 4-byte length.
    pub fn bytes32(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.raw(len)
    }

    /// Reads a UTF-8 string prefixed by a 1-byte length.
    pub fn str8(&mut self) -> CodecResult<String> {
        utf8(self.bytes8()?)
    }

    /// Reads a UTF-8 string prefixed by a 2-byte length.
    pub fn str16(&mut self) -> CodecResult<String> {
        utf8(self.bytes16()?)
    }
}

fn utf8(bytes: &[u8]) -> CodecResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| CodecError::InvalidUtf8)
}
