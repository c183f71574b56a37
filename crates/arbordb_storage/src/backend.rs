//! Storage backend trait definition.

use crate::error::StorageResult;

/// Byte-addressable storage holding one index file image.
///
/// Index files are written mostly by appending (headers, then leaves) and
/// later patched in place: a tree transaction rewrites whole leaves at
/// their original offsets. Backends do not interpret the bytes.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::OutOfBounds`] if the range ends past the
    /// current size; I/O errors otherwise.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Overwrites `data.len()` bytes at `offset`. A write that starts inside
    /// the image may run past its end and grows it.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::OutOfBounds`] if `offset` is past the end.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Hands buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn flush(&mut self) -> StorageResult<()>;

    /// Flushes and waits until data and metadata are on disk. Called before
    /// a finished file is renamed over the live index.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size of the image in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}

/// Checks that `len` bytes at `offset` lie within an image of `size` bytes.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> StorageResult<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(crate::StorageError::OutOfBounds { offset, len, size }),
    }
}
