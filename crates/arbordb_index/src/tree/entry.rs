//! Tree entries and their encoding.
//!
//! ```text
//! entry  = key value_count(4B) value*
//! value  = pointer_length(2B) pointer_bytes metadata
//! ```

use arbordb_codec::{
    decode_metadata, encode_metadata, CodecResult, Decoder, Encoder, IndexValue, Metadata,
    RecordPointer,
};

/// One value of a tree entry: the record it came from plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryValue {
    /// Encoded [`RecordPointer`].
    pub pointer: Vec<u8>,
    /// Included keys and internal annotations.
    pub metadata: Metadata,
}

impl EntryValue {
    /// Creates a value for a record.
    ///
    /// # Errors
    ///
    /// Fails if the pointer cannot be encoded.
    pub fn new(pointer: &RecordPointer, metadata: Metadata) -> CodecResult<Self> {
        Ok(Self {
            pointer: pointer.encode()?,
            metadata,
        })
    }

    /// Decodes the record pointer.
    ///
    /// # Errors
    ///
    /// Fails if the stored pointer bytes are malformed.
    pub fn record_pointer(&self) -> CodecResult<RecordPointer> {
        RecordPointer::decode(&self.pointer)
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.bytes16("record pointer", &self.pointer)?;
        encode_metadata(&self.metadata, enc)
    }

    pub(crate) fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let pointer = dec.bytes16()?.to_vec();
        let metadata = decode_metadata(dec)?;
        Ok(Self { pointer, metadata })
    }
}

/// A sort key with every value stored under it.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    /// Sort key.
    pub key: IndexValue,
    /// Values in insertion order.
    pub values: Vec<EntryValue>,
}

impl TreeEntry {
    /// Creates an entry.
    pub fn new(key: IndexValue, values: Vec<EntryValue>) -> Self {
        Self { key, values }
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        self.key.encode(enc)?;
        let count = u32::try_from(self.values.len()).map_err(|_| {
            arbordb_codec::CodecError::too_long("entry values", self.values.len(), u32::MAX as usize)
        })?;
        enc.u32(count);
        for value in &self.values {
            value.encode(enc)?;
        }
        Ok(())
    }

    pub(crate) fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let key = IndexValue::decode(dec)?;
        let count = dec.u32()?;
        let mut values = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            values.push(EntryValue::decode(dec)?);
        }
        Ok(Self { key, values })
    }

    /// Adds a value, replacing the metadata of an existing value for the
    /// same record.
    pub(crate) fn upsert(&mut self, value: EntryValue) {
        match self.values.iter_mut().find(|v| v.pointer == value.pointer) {
            Some(existing) => existing.metadata = value.metadata,
            None => self.values.push(value),
        }
    }
}
