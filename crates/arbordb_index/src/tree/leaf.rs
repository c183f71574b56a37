//! Leaf layout.
//!
//! ```text
//! leaf = capacity(4B) used(4B) entry_count(4B) has_lower(1B) [lower_key]
//!        entry* padding
//! ```
//!
//! `capacity` is the number of bytes reserved for the leaf on disk and
//! `used` the number of meaningful bytes, header included. Keys stored in
//! a leaf are never less than its lower bound; the first leaf has none.

use super::entry::TreeEntry;
use super::{TreeError, TreeResult};
use arbordb_codec::{CodecResult, Decoder, Encoder, IndexValue};

pub(crate) const LEAF_HEADER_SIZE: usize = 13;

#[derive(Debug, Clone)]
pub(crate) struct Leaf {
    pub offset: u64,
    pub capacity: u32,
    pub lower: Option<IndexValue>,
    pub entries: Vec<TreeEntry>,
}

/// Encodes a leaf without padding.
pub(crate) fn encode_leaf(
    capacity: u32,
    lower: Option<&IndexValue>,
    entries: &[TreeEntry],
) -> CodecResult<Vec<u8>> {
    let mut body = Encoder::new();
    match lower {
        Some(key) => {
            body.u8(1);
            key.encode(&mut body)?;
        }
        None => {
            body.u8(0);
        }
    }
    for entry in entries {
        entry.encode(&mut body)?;
    }
    let body = body.into_bytes();
    let used = 12 + body.len();
    let mut enc = Encoder::with_capacity(used);
    enc.u32(capacity)
        .u32(u32::try_from(used).unwrap_or(u32::MAX))
        .u32(u32::try_from(entries.len()).unwrap_or(u32::MAX))
        .raw(&body);
    Ok(enc.into_bytes())
}

/// Capacity reserved for a leaf of `used` bytes.
pub(crate) fn leaf_capacity(used: usize, leaf_size: u32, fill_factor: u8) -> u32 {
    let fill = usize::from(fill_factor.clamp(10, 100));
    let wanted = (used * 100).div_ceil(fill);
    u32::try_from(wanted).unwrap_or(u32::MAX).max(leaf_size)
}

impl Leaf {
    /// Decodes the leaf stored at the start of `data`, located at `offset`.
    pub fn decode(data: &[u8], offset: u64) -> TreeResult<Self> {
        let mut dec = Decoder::new(data);
        let capacity = dec.u32()?;
        let used = dec.u32()? as usize;
        let count = dec.u32()?;
        if used > capacity as usize || used > data.len() || used < LEAF_HEADER_SIZE {
            return Err(TreeError::corrupted(format!(
                "leaf at {offset} uses {used} of {capacity} bytes"
            )));
        }
        let mut dec = Decoder::new(&data[12..used]);
        let lower = match dec.u8()? {
            0 => None,
            _ => Some(IndexValue::decode(&mut dec)?),
        };
        let mut entries = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            entries.push(TreeEntry::decode(&mut dec)?);
        }
        if !dec.is_empty() {
            return Err(TreeError::corrupted(format!(
                "leaf at {offset} has trailing bytes"
            )));
        }
        Ok(Self {
            offset,
            capacity,
            lower,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_reserves_headroom() {
        assert_eq!(leaf_capacity(100, 4096, 95), 4096);
        assert_eq!(leaf_capacity(9500, 4096, 95), 10_000);
        assert_eq!(leaf_capacity(3000, 4096, 50), 6000);
        // fill factor is clamped to at least 10%
        assert_eq!(leaf_capacity(1000, 0, 0), 10_000);
    }

    #[test]
    fn leaf_roundtrip() {
        let entries = vec![
            TreeEntry::new(IndexValue::from("a"), vec![]),
            TreeEntry::new(IndexValue::from("b"), vec![]),
        ];
        let lower = IndexValue::from("a");
        let mut bytes = encode_leaf(64, Some(&lower), &entries).unwrap();
        bytes.resize(64, 0);
        let leaf = Leaf::decode(&bytes, 10).unwrap();
        assert_eq!(leaf.capacity, 64);
        assert_eq!(leaf.offset, 10);
        assert_eq!(leaf.lower, Some(lower));
        assert_eq!(leaf.entries, entries);
    }

    #[test]
    fn used_beyond_capacity_is_corrupt() {
        let mut bytes = encode_leaf(4, None, &[]).unwrap();
        bytes.resize(32, 0);
        assert!(matches!(
            Leaf::decode(&bytes, 0),
            Err(TreeError::Corrupted { .. })
        ));
    }
}
