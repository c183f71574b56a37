//! # ArborDB Index
//!
//! Secondary indexes for the ArborDB hierarchical database.
//!
//! This crate provides:
//! - [`DataIndex`]: an index on one key of the records at a wildcard path,
//!   built from the record store into a single file and kept up to date
//!   as records change
//! - Array, full-text and geo variants next to plain value indexes
//! - A query engine with per-index result caching
//! - [`IndexRegistry`]: the indexes of one database directory, with
//!   record-update routing
//!
//! Records are read through the [`RecordStore`] trait; [`MemoryStore`] is
//! an in-memory implementation for embedding and tests.
//!
//! ## Example
//!
//! ```rust,ignore
//! use arbordb_index::{IndexConfig, IndexOptions, IndexRegistry, MemoryStore, QueryOptions};
//!
//! let store = Arc::new(MemoryStore::with_root(root));
//! let registry = IndexRegistry::open("db/indexes", store, IndexConfig::default())?;
//! let ages = registry.create("users", "age", IndexOptions::default())?;
//! for result in ages.query(">", &Value::from(40), &QueryOptions::default())?.iter() {
//!     println!("{} is {}", result.path, result.value);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod geo;
mod index;
mod path;
mod registry;
mod store;
pub mod text;
pub mod tree;

pub use config::{FullTextConfig, IndexConfig, IndexOptions, Stemmer};
pub use error::{IndexError, IndexResult};
pub use index::{
    read_index_header, tree_query, ArrayIndex, DataIndex, EntrySet, FullTextIndex, GeoIndex,
    IndexContext, IndexDescriptor, IndexFileHeader, IndexKind, IndexQueryHint, IndexQueryResult,
    IndexQueryResults, IndexQueryStats, IndexState, IndexVariant, NormalIndex, QueryOperator,
    QueryOptions, TreeHeader, GEOHASH_PRECISION, HEADER_BLOCK_SIZE, KEY_SENTINEL, LAYOUT_VERSION,
    OCCURS_KEY, SIGNATURE,
};
pub use path::{child_path, format_segments, parse_segments, PathPattern, PathSegment};
pub use registry::IndexRegistry;
pub use store::{ChildInfo, MemoryStore, NodeKind, RecordStore};

pub use arbordb_codec::{IndexValue, Metadata, RecordKey, RecordPointer, Value};
