//! Streaming tree builder.

use super::entry::TreeEntry;
use super::leaf::{encode_leaf, leaf_capacity, LEAF_HEADER_SIZE};
use super::{TreeError, TreeInfo, TreeResult, TREE_HEADER_SIZE, TREE_LAYOUT_VERSION};
use arbordb_codec::{Encoder, IndexValue};
use arbordb_storage::StorageBackend;

/// Writes sorted entries into consecutive leaves at the end of a backend.
///
/// Each leaf is filled up to `fill_factor` percent of the leaf size, and
/// reserves the remainder for later inserts.
pub struct TreeBuilder<'a> {
    backend: &'a mut dyn StorageBackend,
    start: u64,
    fill_factor: u8,
    leaf_size: u32,
    leaf_count: u32,
    pending: Vec<TreeEntry>,
    pending_bytes: usize,
    pending_lower: Option<IndexValue>,
    last_key: Option<IndexValue>,
    entry_count: u64,
    value_count: u64,
}

fn tree_header(fill_factor: u8, leaf_count: u32) -> Vec<u8> {
    let mut enc = Encoder::with_capacity(TREE_HEADER_SIZE);
    enc.u8(TREE_LAYOUT_VERSION).u8(fill_factor).u32(leaf_count);
    enc.into_bytes()
}

impl<'a> TreeBuilder<'a> {
    /// Starts a tree at the current end of `backend`.
    ///
    /// # Errors
    ///
    /// Fails if the placeholder header cannot be written.
    pub fn new(
        backend: &'a mut dyn StorageBackend,
        fill_factor: u8,
        leaf_size: u32,
    ) -> TreeResult<Self> {
        let fill_factor = fill_factor.clamp(10, 100);
        let start = backend.append(&tree_header(fill_factor, 0))?;
        Ok(Self {
            backend,
            start,
            fill_factor,
            leaf_size,
            leaf_count: 0,
            pending: Vec::new(),
            pending_bytes: LEAF_HEADER_SIZE,
            pending_lower: None,
            last_key: None,
            entry_count: 0,
            value_count: 0,
        })
    }

    fn target_bytes(&self) -> usize {
        self.leaf_size as usize * usize::from(self.fill_factor) / 100
    }

    /// Adds the next entry. Keys must be strictly ascending.
    ///
    /// # Errors
    ///
    /// Fails for out-of-order keys or on write errors.
    pub fn add(&mut self, entry: TreeEntry) -> TreeResult<()> {
        if let Some(last) = &self.last_key {
            if entry.key <= *last {
                return Err(TreeError::corrupted(format!(
                    "entry \"{}\" added after \"{last}\"",
                    entry.key
                )));
            }
        }
        let mut enc = Encoder::new();
        entry.encode(&mut enc)?;
        let size = enc.len();

        if !self.pending.is_empty() && self.pending_bytes + size > self.target_bytes() {
            self.flush_leaf()?;
        }
        if self.pending.is_empty() && self.leaf_count > 0 {
            self.pending_lower = Some(entry.key.clone());
            self.pending_bytes += entry.key.to_bytes()?.len();
        }
        self.last_key = Some(entry.key.clone());
        self.entry_count += 1;
        self.value_count += entry.values.len() as u64;
        self.pending_bytes += size;
        self.pending.push(entry);
        Ok(())
    }

    fn flush_leaf(&mut self) -> TreeResult<()> {
        let probe = encode_leaf(0, self.pending_lower.as_ref(), &self.pending)?;
        let capacity = leaf_capacity(probe.len(), self.leaf_size, self.fill_factor);
        let mut bytes = encode_leaf(capacity, self.pending_lower.as_ref(), &self.pending)?;
        bytes.resize(capacity as usize, 0);
        self.backend.append(&bytes)?;

        self.leaf_count += 1;
        self.pending.clear();
        self.pending_bytes = LEAF_HEADER_SIZE;
        self.pending_lower = None;
        Ok(())
    }

    /// Writes the last leaf and the final tree header.
    ///
    /// A tree always has at least one leaf, so inserts into an empty tree
    /// have somewhere to go.
    ///
    /// # Errors
    ///
    /// Fails on write errors.
    pub fn finish(mut self) -> TreeResult<TreeInfo> {
        if !self.pending.is_empty() || self.leaf_count == 0 {
            self.flush_leaf()?;
        }
        self.backend
            .write_at(self.start, &tree_header(self.fill_factor, self.leaf_count))?;
        self.backend.flush()?;
        let end = self.backend.size()?;
        Ok(TreeInfo {
            offset: self.start,
            byte_length: end - self.start,
            leaf_count: self.leaf_count,
            entry_count: self.entry_count,
            value_count: self.value_count,
        })
    }
}
