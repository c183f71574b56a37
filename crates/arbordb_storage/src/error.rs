//! Error types for storage and lock operations.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read or in-place write reached past the end of the file image.
    #[error("{len} bytes at offset {offset} are outside a {size}-byte file")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Size of the file image.
        size: u64,
    },
}

/// Errors raised by the named lock primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock could not be acquired within the configured timeout.
    #[error("timed out after {waited:?} waiting for lock \"{name}\"")]
    Timeout {
        /// Name of the lock.
        name: String,
        /// How long the request waited.
        waited: Duration,
    },

    /// The request was rejected because a critical holder of the lock expired.
    #[error("lock \"{name}\" request rejected: critical holder expired")]
    Rejected {
        /// Name of the lock.
        name: String,
    },
}
