//! Metadata records stored alongside each tree entry value.

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{CodecError, CodecResult};
use crate::key::IndexValue;
use std::collections::BTreeMap;

/// Mapping of metadata key to primitive value.
///
/// Included keys of the source record are copied here, as are internal
/// annotations such as full-text occurrence lists.
pub type Metadata = BTreeMap<String, IndexValue>;

/// Encodes metadata as `count(1B)` followed by `(name(1B len), value)` pairs.
///
/// # Errors
///
/// Fails if there are more than 255 keys, or a name or string value exceeds
/// 255 bytes.
pub fn encode_metadata(metadata: &Metadata, enc: &mut Encoder) -> CodecResult<()> {
    let count = u8::try_from(metadata.len())
        .map_err(|_| CodecError::too_long("metadata", metadata.len(), u8::MAX as usize))?;
    enc.u8(count);
    for (name, value) in metadata {
        enc.bytes8("metadata key", name.as_bytes())?;
        value.encode(enc)?;
    }
    Ok(())
}

/// Decodes metadata written by [`encode_metadata`].
pub fn decode_metadata(dec: &mut Decoder<'_>) -> CodecResult<Metadata> {
    let count = dec.u8()?;
    let mut metadata = Metadata::new();
    for _ in 0..count {
        let name = dec.str8()?;
        let value = IndexValue::decode(dec)?;
        metadata.insert(name, value);
    }
    Ok(metadata)
}
