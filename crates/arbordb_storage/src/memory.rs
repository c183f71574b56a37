//! In-memory storage backend.

use crate::backend::{check_range, StorageBackend};
use crate::error::{StorageError, StorageResult};

/// An index file image held in a `Vec`, for trees that never touch disk.
///
/// ```
/// use arbordb_storage::{InMemoryBackend, StorageBackend};
///
/// let mut image = InMemoryBackend::new();
/// let leaf = image.append(&[0; 4])?;
/// image.write_at(leaf, b"ok")?;
/// assert_eq!(image.read_at(0, 4)?, [b'o', b'k', 0, 0]);
/// # Ok::<(), arbordb_storage::StorageError>(())
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates an empty image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_range(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let size = self.data.len() as u64;
        if offset > size {
            return Err(StorageError::OutOfBounds {
                offset,
                len: data.len(),
                size,
            });
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_at_end_extends_the_image() {
        let mut image = InMemoryBackend::new();
        image.append(b"abc").unwrap();
        image.write_at(3, b"de").unwrap();
        assert_eq!(image.size().unwrap(), 5);
        assert_eq!(image.read_at(1, 4).unwrap(), b"bcde");
    }

    #[test]
    fn ranges_past_the_end_fail() {
        let mut image = InMemoryBackend::new();
        image.append(b"abc").unwrap();
        assert!(matches!(
            image.read_at(2, 2),
            Err(StorageError::OutOfBounds { size: 3, .. })
        ));
        assert!(image.write_at(4, b"x").is_err());
        assert!(image.read_at(u64::MAX, 1).is_err());
    }
}
