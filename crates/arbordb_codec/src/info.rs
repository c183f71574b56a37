//! Typed name/value info blocks.
//!
//! Index files describe themselves with info blocks:
//!
//! ```text
//! info_count(1B)
//! info_count × (name_length(1B), name_bytes, value_type(1B),
//!               [value_length(2B)], value_bytes)
//! ```
//!
//! `value_length` is omitted for `UNDEFINED` (no value bytes) and `BOOLEAN`
//! (one value byte). For `ARRAY`, `value_length` is the item count and the
//! items follow, each encoded as `value_type [value_length] value_bytes`.

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{CodecError, CodecResult};

const TYPE_UNDEFINED: u8 = 0;
const TYPE_STRING: u8 = 1;
const TYPE_NUMBER: u8 = 2;
const TYPE_BOOLEAN: u8 = 3;
const TYPE_ARRAY: u8 = 4;

/// A value in an info block.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    /// No value.
    Undefined,
    /// UTF-8 string.
    String(String),
    /// 8-byte float.
    Number(f64),
    /// Boolean.
    Boolean(bool),
    /// List of values.
    Array(Vec<InfoValue>),
}

impl InfoValue {
    /// Get this value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            InfoValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            InfoValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InfoValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[InfoValue]> {
        match self {
            InfoValue::Array(items) => Some(items),
            _ => None,
        }
    }

    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        match self {
            InfoValue::Undefined => {
                enc.u8(TYPE_UNDEFINED);
            }
            InfoValue::String(s) => {
                enc.u8(TYPE_STRING).bytes16("info string", s.as_bytes())?;
            }
            InfoValue::Number(n) => {
                enc.u8(TYPE_NUMBER).u16(8).f64(*n);
            }
            InfoValue::Boolean(b) => {
                enc.u8(TYPE_BOOLEAN).u8(u8::from(*b));
            }
            InfoValue::Array(items) => {
                let count = u16::try_from(items.len())
                    .map_err(|_| CodecError::too_long("info array", items.len(), 65535))?;
                enc.u8(TYPE_ARRAY).u16(count);
                for item in items {
                    item.encode(enc)?;
                }
            }
        }
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        match dec.u8()? {
            TYPE_UNDEFINED => Ok(InfoValue::Undefined),
            TYPE_STRING => Ok(InfoValue::String(dec.str16()?)),
            TYPE_NUMBER => {
                let len = dec.u16()?;
                if len != 8 {
                    return Err(CodecError::invalid_structure(format!(
                        "number info value has length {len}"
                    )));
                }
                Ok(InfoValue::Number(dec.f64()?))
            }
            TYPE_BOOLEAN => Ok(InfoValue::Boolean(dec.u8()? != 0)),
            TYPE_ARRAY => {
                let count = dec.u16()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(InfoValue::decode(dec)?);
                }
                Ok(InfoValue::Array(items))
            }
            tag => Err(CodecError::InvalidTag { what: "info value", tag }),
        }
    }
}

impl From<&str> for InfoValue {
    fn from(s: &str) -> Self {
        InfoValue::String(s.to_string())
    }
}

impl From<String> for InfoValue {
    fn from(s: String) -> Self {
        InfoValue::String(s)
    }
}

impl From<bool> for InfoValue {
    fn from(b: bool) -> Self {
        InfoValue::Boolean(b)
    }
}

impl From<f64> for InfoValue {
    fn from(n: f64) -> Self {
        InfoValue::Number(n)
    }
}

/// An ordered list of named info values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoBlock {
    entries: Vec<(String, InfoValue)>,
}

impl InfoBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends (or replaces) a named value.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<InfoValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a named value, replacing any existing value with that name.
    pub fn set(&mut self, name: &str, value: impl Into<InfoValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Returns the named value.
    pub fn get(&self, name: &str) -> Option<&InfoValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Iterates entries in stored order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the block has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the block.
    ///
    /// # Errors
    ///
    /// Fails if the block has more than 255 entries or a name exceeds
    /// 255 bytes.
    pub fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        let count = u8::try_from(self.entries.len())
            .map_err(|_| CodecError::too_long("info block", self.entries.len(), 255))?;
        enc.u8(count);
        for (name, value) in &self.entries {
            enc.bytes8("info name", name.as_bytes())?;
            value.encode(enc)?;
        }
        Ok(())
    }

    /// Decodes a block written by [`InfoBlock::encode`].
    pub fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let count = dec.u8()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = dec.str8()?;
            entries.push((name, InfoValue::decode(dec)?));
        }
        Ok(Self { entries })
    }
}
