//! Big-endian byte encoder.

use crate::error::{CodecError, CodecResult};

/// Appends big-endian primitives and length-prefixed strings to a buffer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with preallocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Returns the encoded length so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Writes a single byte.
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Writes a 2-byte unsigned integer.
    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Writes a 4-byte unsigned integer.
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Writes an 8-byte signed integer.
    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Writes an 8-byte IEEE-754 float.
    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Writes raw bytes without a length prefix.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Writes bytes prefixed by a 1-byte length.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLong`] if `bytes` exceeds 255 bytes.
    pub fn bytes8(&mut self, what: &'static str, bytes: &[u8]) -> CodecResult<&mut Self> {
        let len = u8::try_from(bytes.len())
            .map_err(|_| CodecError::too_long(what, bytes.len(), u8::MAX as usize))?;
        self.buf.push(len);
        self.buf.extend_from_slice(bytes);
        Ok(self)
    }

    /// Writes bytes prefixed by a 2-byte length.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLong`] if `bytes` exceeds 65535 bytes.
    pub fn bytes16(&mut self, what: &'static str, bytes: &[u8]) -> CodecResult<&mut Self> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| CodecError::too_long(what, bytes.len(), u16::MAX as usize))?;
        self.u16(len);
        self.buf.extend_from_slice(bytes);
        Ok(self)
    }

    /// Writes bytes prefixed by a 4-byte length.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLong`] if `bytes` exceeds `u32::MAX` bytes.
    pub fn bytes32(&mut self, what: &'static str, bytes: &[u8]) -> CodecResult<&mut Self> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| CodecError::too_long(what, bytes.len(), u32::MAX as usize))?;
        self.u32(len);
        self.buf.extend_from_slice(bytes);
        Ok(self)
    }
}

/// Truncates `s` to at most `max` bytes on a character boundary.
///
/// Returns `None` if no truncation was needed.
#[must_use]
pub fn truncate_utf8(s: &str, max: usize) -> Option<&str> {
    if s.len() <= max {
        return None;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    Some(&s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_big_endian() {
        let mut enc = Encoder::new();
        enc.u8(1).u16(0x0203).u32(0x0405_0607);
        assert_eq!(enc.as_bytes(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn bytes8_rejects_long_input() {
        let mut enc = Encoder::new();
        let long = vec![0u8; 256];
        let err = enc.bytes8("key", &long).unwrap_err();
        assert_eq!(err, CodecError::too_long("key", 256, 255));
        assert!(enc.is_empty());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_utf8("short", 10), None);
        assert_eq!(truncate_utf8("abcdef", 3), Some("abc"));
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(truncate_utf8("aéb", 2), Some("a"));
    }
}
