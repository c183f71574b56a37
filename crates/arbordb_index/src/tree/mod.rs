//! On-disk ordered tree.
//!
//! The tree maps sorted [`IndexValue`] keys to lists of [`EntryValue`]s.
//! It is stored as a short header followed by consecutive leaves:
//!
//! ```text
//! tree = layout_version(1B) fill_factor(1B) leaf_count(4B) leaf*
//! ```
//!
//! Every leaf reserves free space (see [`TreeBuilder`]) so that updates can
//! be written in place. The leaf table is kept in memory while the tree is
//! open; a transaction rewrites only the leaves it touches. When a leaf
//! runs out of room the transaction fails with [`TreeError::NeedsRebuild`]
//! and nothing is written.

mod builder;
mod entry;
mod leaf;
mod query;

pub use builder::TreeBuilder;
pub use entry::{EntryValue, TreeEntry};
pub use query::{like_regex, TreeQuery};

use arbordb_codec::{CodecError, Decoder, IndexValue};
use arbordb_storage::{StorageBackend, StorageError};
use leaf::{encode_leaf, Leaf};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

pub(crate) const TREE_LAYOUT_VERSION: u8 = 1;
pub(crate) const TREE_HEADER_SIZE: usize = 6;

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors raised by the tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A leaf has no room for the transaction; the tree must be rebuilt.
    #[error("leaf {leaf} needs {required} bytes but only has {capacity}")]
    NeedsRebuild {
        /// Leaf number.
        leaf: usize,
        /// Bytes the updated leaf would need.
        required: usize,
        /// Bytes reserved for the leaf.
        capacity: u32,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The stored tree is malformed.
    #[error("corrupted tree: {message}")]
    Corrupted {
        /// Description of the problem.
        message: String,
    },
}

impl TreeError {
    pub(crate) fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

/// Summary of a written tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeInfo {
    /// Offset of the tree in its backend.
    pub offset: u64,
    /// Total bytes of header and leaves.
    pub byte_length: u64,
    /// Number of leaves.
    pub leaf_count: u32,
    /// Number of distinct keys.
    pub entry_count: u64,
    /// Number of values across all keys.
    pub value_count: u64,
}

/// One change in a tree transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeOp {
    /// Store a value under a key, replacing the metadata of an existing
    /// value for the same record.
    Add {
        /// Sort key.
        key: IndexValue,
        /// Value to store.
        value: EntryValue,
    },
    /// Remove a record's value from a key. Removing an absent value is a no-op.
    Remove {
        /// Sort key.
        key: IndexValue,
        /// Encoded record pointer.
        pointer: Vec<u8>,
    },
}

impl TreeOp {
    fn key(&self) -> &IndexValue {
        match self {
            TreeOp::Add { key, .. } | TreeOp::Remove { key, .. } => key,
        }
    }
}

fn apply_op(entries: &mut Vec<TreeEntry>, op: &TreeOp) {
    let found = entries.binary_search_by(|e| e.key.compare(op.key()));
    match (op, found) {
        (TreeOp::Add { value, .. }, Ok(i)) => entries[i].upsert(value.clone()),
        (TreeOp::Add { key, value }, Err(i)) => {
            entries.insert(i, TreeEntry::new(key.clone(), vec![value.clone()]));
        }
        (TreeOp::Remove { pointer, .. }, Ok(i)) => {
            entries[i].values.retain(|v| v.pointer != *pointer);
            if entries[i].values.is_empty() {
                entries.remove(i);
            }
        }
        (TreeOp::Remove { .. }, Err(_)) => {}
    }
}

/// An open tree.
pub struct BinaryTree {
    backend: Box<dyn StorageBackend>,
    offset: u64,
    fill_factor: u8,
    leaves: Vec<Leaf>,
}

impl std::fmt::Debug for BinaryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryTree")
            .field("offset", &self.offset)
            .field("fill_factor", &self.fill_factor)
            .field("leaves", &self.leaves.len())
            .finish_non_exhaustive()
    }
}

impl BinaryTree {
    /// Opens the tree stored at `offset..offset + byte_length` of `backend`.
    ///
    /// # Errors
    ///
    /// Fails if the bytes cannot be read or do not hold a valid tree.
    pub fn open(backend: Box<dyn StorageBackend>, offset: u64, byte_length: u64) -> TreeResult<Self> {
        let len = usize::try_from(byte_length)
            .map_err(|_| TreeError::corrupted("tree too large for this platform"))?;
        let data = backend.read_at(offset, len)?;
        let mut dec = Decoder::new(&data);
        let version = dec.u8()?;
        if version != TREE_LAYOUT_VERSION {
            return Err(TreeError::corrupted(format!(
                "unsupported tree layout version {version}"
            )));
        }
        let fill_factor = dec.u8()?;
        let leaf_count = dec.u32()?;

        let mut leaves = Vec::with_capacity(leaf_count as usize);
        let mut pos = TREE_HEADER_SIZE;
        for _ in 0..leaf_count {
            let rest = data
                .get(pos..)
                .ok_or_else(|| TreeError::corrupted("leaf table runs past the tree"))?;
            let leaf = Leaf::decode(rest, offset + pos as u64)?;
            pos += leaf.capacity as usize;
            leaves.push(leaf);
        }
        if pos > data.len() {
            return Err(TreeError::corrupted("last leaf runs past the tree"));
        }
        Ok(Self {
            backend,
            offset,
            fill_factor,
            leaves,
        })
    }

    /// Fill factor the tree was built with.
    pub fn fill_factor(&self) -> u8 {
        self.fill_factor
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Number of distinct keys.
    pub fn entry_count(&self) -> usize {
        self.leaves.iter().map(|l| l.entries.len()).sum()
    }

    /// Number of values across all keys.
    pub fn value_count(&self) -> usize {
        self.entries().map(|e| e.values.len()).sum()
    }

    /// All entries in key order; reverse the iterator to walk from the last leaf.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &TreeEntry> + '_ {
        self.leaves.iter().flat_map(|leaf| leaf.entries.iter())
    }

    /// Index of the leaf that holds (or would hold) `key`.
    fn leaf_for(&self, key: &IndexValue) -> usize {
        self.leaves
            .partition_point(|leaf| leaf.lower.as_ref().is_none_or(|lower| lower <= key))
            .saturating_sub(1)
    }

    /// Entries whose key satisfies `query`, in key order.
    pub fn search(&self, query: &TreeQuery) -> Vec<&TreeEntry> {
        let (lower, upper) = query.bounds();
        let start = lower.as_ref().map_or(0, |key| self.leaf_for(key));
        self.leaves[start.min(self.leaves.len())..]
            .iter()
            .flat_map(|leaf| leaf.entries.iter())
            .skip_while(|e| lower.as_ref().is_some_and(|key| e.key < *key))
            .take_while(|e| upper.as_ref().is_none_or(|key| e.key <= *key))
            .filter(|e| query.matches(&e.key))
            .collect()
    }

    /// Number of values whose key satisfies `query`.
    pub fn count(&self, query: &TreeQuery) -> usize {
        self.search(query).iter().map(|e| e.values.len()).sum()
    }

    /// Every value whose record has no value rejected by `blacklisted`.
    ///
    /// The first pass collects the pointers of rejected records, the second
    /// returns the values of all other records.
    pub fn scan_excluding<F>(&self, blacklisted: F) -> Vec<(&IndexValue, &EntryValue)>
    where
        F: Fn(&IndexValue, &EntryValue) -> bool,
    {
        let mut rejected: HashSet<&[u8]> = HashSet::new();
        for entry in self.entries() {
            for value in &entry.values {
                if blacklisted(&entry.key, value) {
                    rejected.insert(value.pointer.as_slice());
                }
            }
        }
        self.entries()
            .flat_map(|e| e.values.iter().map(move |v| (&e.key, v)))
            .filter(|(_, v)| !rejected.contains(v.pointer.as_slice()))
            .collect()
    }

    /// Applies `ops` atomically.
    ///
    /// All affected leaves are updated in memory first; if any no longer
    /// fits its reserved space, nothing is written.
    ///
    /// # Errors
    ///
    /// [`TreeError::NeedsRebuild`] on leaf overflow, storage errors otherwise.
    pub fn transaction(&mut self, ops: &[TreeOp]) -> TreeResult<()> {
        if self.leaves.is_empty() {
            return Err(TreeError::corrupted("tree has no leaves"));
        }
        let mut changed: BTreeMap<usize, Vec<TreeEntry>> = BTreeMap::new();
        for op in ops {
            let index = self.leaf_for(op.key());
            let entries = changed
                .entry(index)
                .or_insert_with(|| self.leaves[index].entries.clone());
            apply_op(entries, op);
        }

        let mut writes = Vec::with_capacity(changed.len());
        for (index, entries) in &changed {
            let target = &self.leaves[*index];
            let bytes = encode_leaf(target.capacity, target.lower.as_ref(), entries)?;
            if bytes.len() > target.capacity as usize {
                return Err(TreeError::NeedsRebuild {
                    leaf: *index,
                    required: bytes.len(),
                    capacity: target.capacity,
                });
            }
            writes.push((target.offset, bytes));
        }

        for (offset, bytes) in &writes {
            self.backend.write_at(*offset, bytes)?;
        }
        self.backend.flush()?;
        for (index, entries) in changed {
            self.leaves[index].entries = entries;
        }
        Ok(())
    }

    /// Writes every entry into a new tree, with `pending` applied on the way.
    ///
    /// Leaves are streamed one at a time; only the leaves touched by
    /// `pending` are modified.
    ///
    /// # Errors
    ///
    /// Fails on write errors.
    pub fn rebuild_into(&self, builder: &mut TreeBuilder<'_>, pending: &[TreeOp]) -> TreeResult<()> {
        let mut changed: BTreeMap<usize, Vec<&TreeOp>> = BTreeMap::new();
        for op in pending {
            changed.entry(self.leaf_for(op.key())).or_default().push(op);
        }
        for (index, leaf) in self.leaves.iter().enumerate() {
            match changed.get(&index) {
                Some(ops) => {
                    let mut entries = leaf.entries.clone();
                    for op in ops {
                        apply_op(&mut entries, op);
                    }
                    for entry in entries {
                        builder.add(entry)?;
                    }
                }
                None => {
                    for entry in &leaf.entries {
                        builder.add(entry.clone())?;
                    }
                }
            }
        }
        Ok(())
    }
}
