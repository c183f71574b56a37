//! # ArborDB Storage
//!
//! Low-level primitives the ArborDB index engine is built on.
//!
//! This crate provides:
//! - [`StorageBackend`]: an opaque, byte-addressable store (read, write in place,
//!   append, flush). Backends do not interpret the bytes they hold.
//! - [`FileBackend`] and [`InMemoryBackend`] implementations.
//! - File helpers for atomic replacement ([`rename_with_retry`], [`remove_if_exists`]).
//! - [`LockManager`]: named shared/exclusive locks with a FIFO wait queue and
//!   timeout-driven expiry.
//!
//! ## Example
//!
//! ```rust
//! use arbordb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! backend.write_at(offset, b"HELLO").unwrap();
//! assert_eq!(&backend.read_at(0, 11).unwrap(), b"HELLO world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod fs;
mod lock;
mod memory;

pub use backend::StorageBackend;
pub use error::{LockError, LockResult, StorageError, StorageResult};
pub use file::FileBackend;
pub use fs::{remove_if_exists, rename_with_retry};
pub use lock::{LockGuard, LockManager, LockMode, LockOptions};
pub use memory::InMemoryBackend;
