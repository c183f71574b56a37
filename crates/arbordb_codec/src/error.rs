//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Unknown type tag.
    #[error("unknown {what} type tag {tag}")]
    InvalidTag {
        /// What was being decoded.
        what: &'static str,
        /// The tag byte found.
        tag: u8,
    },

    /// A length-prefixed field does not fit its prefix.
    #[error("{what} is {len} bytes, maximum is {max}")]
    TooLong {
        /// What was being encoded.
        what: &'static str,
        /// Actual length.
        len: usize,
        /// Maximum length.
        max: usize,
    },

    /// Invalid structure.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create a too-long error.
    pub fn too_long(what: &'static str, len: usize, max: usize) -> Self {
        Self::TooLong { what, len, max }
    }
}
