//! Record pointer codec.
//!
//! A record pointer locates the source record of a tree entry value: the
//! values captured by each wildcard of the indexed path, followed by the
//! record's own key (or array index). Substituting the wildcards back into
//! the path pattern reconstructs the record's absolute path.
//!
//! ## Format
//!
//! ```text
//! wildcard_count(1B)
//! wildcard_count × (length(1B), utf8 bytes)
//! key_kind(1B: 0 = name, 1 = array index)
//! name: length(1B), utf8 bytes | index: u32 big-endian
//! ```

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{CodecError, CodecResult};
use std::fmt;

const KEY_NAME: u8 = 0;
const KEY_INDEX: u8 = 1;

/// The terminal key of a record: a child name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    /// Named child.
    Name(String),
    /// Array element.
    Index(u32),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Name(name) => f.write_str(name),
            RecordKey::Index(index) => write!(f, "[{index}]"),
        }
    }
}

impl From<&str> for RecordKey {
    fn from(name: &str) -> Self {
        RecordKey::Name(name.to_string())
    }
}

/// Decoded record pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordPointer {
    /// Values captured by the path's wildcards, in path order.
    pub wildcards: Vec<String>,
    /// The record's own key.
    pub key: RecordKey,
}

impl RecordPointer {
    /// Creates a pointer.
    pub fn new(wildcards: Vec<String>, key: RecordKey) -> Self {
        Self { wildcards, key }
    }

    /// Encodes the pointer.
    ///
    /// # Errors
    ///
    /// Fails if there are more than 255 wildcards or a string exceeds
    /// 255 bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let count = u8::try_from(self.wildcards.len())
            .map_err(|_| CodecError::too_long("wildcards", self.wildcards.len(), 255))?;
        let mut enc = Encoder::with_capacity(16);
        enc.u8(count);
        for wildcard in &self.wildcards {
            enc.bytes8("wildcard value", wildcard.as_bytes())?;
        }
        match &self.key {
            RecordKey::Name(name) => {
                enc.u8(KEY_NAME).bytes8("record key", name.as_bytes())?;
            }
            RecordKey::Index(index) => {
                enc.u8(KEY_INDEX).u32(*index);
            }
        }
        Ok(enc.into_bytes())
    }

    /// Decodes a pointer written by [`RecordPointer::encode`].
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut dec = Decoder::new(bytes);
        let count = dec.u8()?;
        let mut wildcards = Vec::with_capacity(count as usize);
        for _ in 0..count {
            wildcards.push(dec.str8()?);
        }
        let key = match dec.u8()? {
            KEY_NAME => RecordKey::Name(dec.str8()?),
            KEY_INDEX => RecordKey::Index(dec.u32()?),
            tag => return Err(CodecError::InvalidTag { what: "record key", tag }),
        };
        if !dec.is_empty() {
            return Err(CodecError::invalid_structure("trailing bytes after record pointer"));
        }
        Ok(Self { wildcards, key })
    }
}
