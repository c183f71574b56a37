//! Index file layout.
//!
//! ```text
//! signature("ACEBASEIDX") layout_version(1B) header_length(4B)
//! index_info_block
//! trees_info_block
//! padding to a HEADER_BLOCK_SIZE boundary
//! tree payload
//! ```
//!
//! `header_length` counts every byte before the tree payload, padding
//! included. The trees block is `trees_count(1B)` followed by, per tree,
//! `name(1B length + bytes) file_index(4B) byte_length(4B) info_block`.
//!
//! Files are always written under a temporary name and renamed into place,
//! so a canonical index file is either complete or absent.

use super::descriptor::IndexDescriptor;
use crate::error::{IndexError, IndexResult};
use crate::tree::{BinaryTree, TreeBuilder, TreeInfo};
use arbordb_codec::{Decoder, Encoder, InfoBlock, InfoValue};
use arbordb_storage::{FileBackend, StorageBackend};
use std::path::Path;
use tracing::debug;

/// File signature.
pub const SIGNATURE: &[u8; 10] = b"ACEBASEIDX";

/// Layout version written after the signature.
pub const LAYOUT_VERSION: u8 = 1;

/// The header is padded to a multiple of this size.
pub const HEADER_BLOCK_SIZE: usize = 4096;
const PREAMBLE_SIZE: usize = SIGNATURE.len() + 1 + 4;
const DEFAULT_TREE: &str = "default";
const TREE_CLASS: &str = "BinaryTree";

/// Location and statistics of one tree in an index file.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeHeader {
    /// Tree name.
    pub name: String,
    /// Offset of the tree payload.
    pub file_index: u32,
    /// Length of the tree payload.
    pub byte_length: u32,
    /// Class, version and entry counts.
    pub info: InfoBlock,
}

impl TreeHeader {
    fn new(name: &str, tree: &TreeInfo) -> IndexResult<Self> {
        let too_large = || IndexError::invalid_operation("index file exceeds 4 GiB");
        #[allow(clippy::cast_precision_loss)]
        let info = InfoBlock::new()
            .with("class", TREE_CLASS)
            .with("version", 1.0)
            .with("entries", tree.entry_count as f64)
            .with("values", tree.value_count as f64);
        Ok(Self {
            name: name.to_string(),
            file_index: u32::try_from(tree.offset).map_err(|_| too_large())?,
            byte_length: u32::try_from(tree.byte_length).map_err(|_| too_large())?,
            info,
        })
    }

    /// Number of distinct keys recorded when the tree was written.
    pub fn entries(&self) -> Option<f64> {
        self.info.get("entries").and_then(InfoValue::as_f64)
    }

    /// Number of values recorded when the tree was written.
    pub fn values(&self) -> Option<f64> {
        self.info.get("values").and_then(InfoValue::as_f64)
    }
}

/// Parsed header of an index file.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFileHeader {
    /// Descriptor info.
    pub info: InfoBlock,
    /// Trees stored in the file.
    pub trees: Vec<TreeHeader>,
    /// Bytes before the first tree payload.
    pub header_length: u32,
}

impl IndexFileHeader {
    /// Encodes the header, padded to the block boundary.
    fn encode(info: &InfoBlock, trees: &[TreeHeader]) -> IndexResult<Vec<u8>> {
        let mut body = Encoder::new();
        info.encode(&mut body)?;
        let count = u8::try_from(trees.len())
            .map_err(|_| IndexError::invalid_operation("too many trees in index file"))?;
        body.u8(count);
        for tree in trees {
            body.bytes8("tree name", tree.name.as_bytes())?
                .u32(tree.file_index)
                .u32(tree.byte_length);
            tree.info.encode(&mut body)?;
        }

        let unpadded = PREAMBLE_SIZE + body.len();
        let header_length = unpadded.div_ceil(HEADER_BLOCK_SIZE) * HEADER_BLOCK_SIZE;
        let mut enc = Encoder::with_capacity(header_length);
        enc.raw(SIGNATURE)
            .u8(LAYOUT_VERSION)
            .u32(u32::try_from(header_length).unwrap_or(u32::MAX))
            .raw(body.as_bytes());
        let mut bytes = enc.into_bytes();
        bytes.resize(header_length, 0);
        Ok(bytes)
    }

    /// Reads the header from the start of a backend.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidFormat`] for a wrong signature or
    /// layout version, and codec errors for malformed blocks.
    pub fn read(backend: &dyn StorageBackend) -> IndexResult<Self> {
        if backend.size()? < PREAMBLE_SIZE as u64 {
            return Err(IndexError::invalid_format("file too small for an index header"));
        }
        let preamble = backend.read_at(0, PREAMBLE_SIZE)?;
        if &preamble[..SIGNATURE.len()] != SIGNATURE {
            return Err(IndexError::invalid_format("missing index file signature"));
        }
        let mut dec = Decoder::new(&preamble[SIGNATURE.len()..]);
        let version = dec.u8()?;
        if version != LAYOUT_VERSION {
            return Err(IndexError::invalid_format(format!(
                "unsupported layout version {version}"
            )));
        }
        let header_length = dec.u32()?;
        if (header_length as usize) < PREAMBLE_SIZE {
            return Err(IndexError::invalid_format("header length too small"));
        }

        let data = backend.read_at(
            PREAMBLE_SIZE as u64,
            header_length as usize - PREAMBLE_SIZE,
        )?;
        let mut dec = Decoder::new(&data);
        let info = InfoBlock::decode(&mut dec)?;
        let count = dec.u8()?;
        let mut trees = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let name = dec.str8()?;
            let file_index = dec.u32()?;
            let byte_length = dec.u32()?;
            let info = InfoBlock::decode(&mut dec)?;
            trees.push(TreeHeader {
                name,
                file_index,
                byte_length,
                info,
            });
        }
        Ok(Self {
            info,
            trees,
            header_length,
        })
    }

    /// Looks up a tree by name.
    pub fn tree(&self, name: &str) -> Option<&TreeHeader> {
        self.trees.iter().find(|t| t.name == name)
    }

    /// The tree holding the index entries.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidFormat`] if the file has no such tree.
    pub fn default_tree(&self) -> IndexResult<&TreeHeader> {
        self.tree(DEFAULT_TREE)
            .ok_or_else(|| IndexError::invalid_format("index file has no default tree"))
    }
}

/// Reads the header of the index file at `path`.
///
/// # Errors
///
/// Fails if the file cannot be opened or has no valid header.
pub fn read_index_header(path: &Path) -> IndexResult<IndexFileHeader> {
    let backend = FileBackend::open(path)?;
    IndexFileHeader::read(&backend)
}

/// Writes a complete index file at `path`, replacing any existing file.
///
/// The header is written with placeholder tree statistics, `fill` streams
/// sorted entries into the tree, and the header is then patched in place.
///
/// # Errors
///
/// Fails on write errors or if `fill` fails.
pub(crate) fn write_index_file<F>(
    path: &Path,
    descriptor: &IndexDescriptor,
    fill_factor: u8,
    leaf_size: u32,
    fill: F,
) -> IndexResult<TreeInfo>
where
    F: FnOnce(&mut TreeBuilder<'_>) -> IndexResult<()>,
{
    let info = descriptor.to_info();
    let placeholder = TreeInfo {
        offset: 0,
        byte_length: 0,
        leaf_count: 0,
        entry_count: 0,
        value_count: 0,
    };
    let header = IndexFileHeader::encode(&info, &[TreeHeader::new(DEFAULT_TREE, &placeholder)?])?;

    let mut backend = FileBackend::create(path)?;
    backend.append(&header)?;
    let tree = {
        let mut builder = TreeBuilder::new(&mut backend, fill_factor, leaf_size)?;
        fill(&mut builder)?;
        builder.finish()?
    };

    let patched = IndexFileHeader::encode(&info, &[TreeHeader::new(DEFAULT_TREE, &tree)?])?;
    if patched.len() != header.len() {
        return Err(IndexError::internal("index header changed size while patching"));
    }
    backend.write_at(0, &patched)?;
    backend.sync()?;
    debug!(
        file = %path.display(),
        entries = tree.entry_count,
        values = tree.value_count,
        leaves = tree.leaf_count,
        "index file written"
    );
    Ok(tree)
}

/// Opens the index file at `path`, returning its header and tree.
///
/// # Errors
///
/// Fails if the file cannot be read or is malformed.
pub(crate) fn open_index_file(path: &Path) -> IndexResult<(IndexFileHeader, BinaryTree)> {
    let backend = FileBackend::open(path)?;
    let header = IndexFileHeader::read(&backend)?;
    let tree_header = header.default_tree()?;
    let tree = BinaryTree::open(
        Box::new(backend),
        u64::from(tree_header.file_index),
        u64::from(tree_header.byte_length),
    )?;
    Ok((header, tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexOptions;
    use crate::tree::{EntryValue, TreeEntry};
    use arbordb_codec::{IndexValue, Metadata, RecordKey, RecordPointer};

    fn descriptor() -> IndexDescriptor {
        IndexDescriptor::new("users", "age", IndexOptions::default()).unwrap()
    }

    #[test]
    fn header_starts_with_signature_and_is_block_aligned() {
        let bytes = IndexFileHeader::encode(&descriptor().to_info(), &[]).unwrap();
        assert_eq!(&bytes[..10], b"ACEBASEIDX");
        assert_eq!(bytes[10], 1);
        assert_eq!(u32::from_be_bytes([bytes[11], bytes[12], bytes[13], bytes[14]]), 4096);
        assert_eq!(bytes.len(), 4096);
    }

    #[test]
    fn written_file_can_be_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users-age.idx");
        let pointer = RecordPointer::new(vec![], RecordKey::from("ewout"));
        let value = EntryValue::new(&pointer, Metadata::new()).unwrap();

        let info = write_index_file(&path, &descriptor(), 95, 4096, |builder| {
            builder.add(TreeEntry::new(IndexValue::from(42.0), vec![value.clone()]))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(info.offset, 4096);

        let header = read_index_header(&path).unwrap();
        assert_eq!(header.header_length, 4096);
        assert_eq!(header.info.get("key").and_then(InfoValue::as_str), Some("age"));
        let tree_header = header.default_tree().unwrap();
        assert_eq!(tree_header.file_index, 4096);
        assert_eq!(tree_header.entries(), Some(1.0));
        assert_eq!(tree_header.values(), Some(1.0));

        let (_, tree) = open_index_file(&path).unwrap();
        assert_eq!(tree.entry_count(), 1);
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.idx");
        std::fs::write(&path, b"NOTANINDEXFILE-at-all").unwrap();
        assert!(matches!(
            read_index_header(&path),
            Err(IndexError::InvalidFormat { .. })
        ));
    }
}
