//! Error types for the index engine.

use crate::tree::TreeError;
use arbordb_codec::CodecError;
use arbordb_storage::{LockError, StorageError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur in index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Lock acquisition failed.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the index directory.
    #[error("index directory is locked by another process: {path}")]
    DirectoryLocked {
        /// The locked directory.
        path: PathBuf,
    },

    /// The record store collaborator failed.
    #[error("record store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },

    /// The operator is not supported by this kind of index.
    #[error("operator \"{operator}\" is not supported by {kind} indexes")]
    UnsupportedOperator {
        /// The rejected operator.
        operator: String,
        /// The index kind.
        kind: &'static str,
    },

    /// A query or index argument has the wrong shape or type.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The index file is malformed.
    #[error("invalid index file: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A build was requested while another is running.
    #[error("index is already being built")]
    AlreadyBuilding,

    /// The last build failed; the index is unusable until rebuilt.
    #[error("index build failed: {cause}")]
    BuildFailed {
        /// The stored build error.
        cause: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// An error raised by a specific index.
    #[error("index {description}: {source}")]
    Index {
        /// The index's canonical description.
        description: String,
        /// The underlying error.
        #[source]
        source: Box<IndexError>,
    },
}

impl IndexError {
    /// Creates a record store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attaches the description of the index that raised the error.
    ///
    /// Errors that already carry a description are returned unchanged.
    #[must_use]
    pub fn in_index(self, description: &str) -> Self {
        match self {
            Self::Index { .. } => self,
            other => Self::Index {
                description: description.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, unwrapping index descriptions.
    pub fn root(&self) -> &IndexError {
        match self {
            Self::Index { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<TreeError> for IndexError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Storage(e) => IndexError::Storage(e),
            TreeError::Codec(e) => IndexError::Codec(e),
            TreeError::Corrupted { message } => IndexError::InvalidFormat { message },
            overflow @ TreeError::NeedsRebuild { .. } => IndexError::Internal {
                message: format!("unhandled tree overflow: {overflow}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_index_wraps_once() {
        let err = IndexError::AlreadyBuilding
            .in_index("/users/*/name")
            .in_index("/other/*/key");
        assert_eq!(
            err.to_string(),
            "index /users/*/name: index is already being built"
        );
        assert!(matches!(err.root(), IndexError::AlreadyBuilding));
    }
}
