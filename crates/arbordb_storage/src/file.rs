//! Index files on disk.

use crate::backend::{check_range, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// An index file, or one of the build artifacts written next to it.
///
/// The file length is tracked in memory; every change goes through
/// `&mut self`, so only the shared cursor needs a lock.
///
/// ```no_run
/// use arbordb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut file = FileBackend::create(Path::new("users-age.idx.tmp"))?;
/// file.append(b"ACEBASEIDX")?;
/// file.sync()?;
/// # Ok::<(), arbordb_storage::StorageError>(())
/// ```
#[derive(Debug)]
pub struct FileBackend {
    file: Mutex<File>,
    len: u64,
}

impl FileBackend {
    /// Creates `path`, replacing any file already there.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            len: 0,
        })
    }

    /// Opens an existing file for reading and in-place updates.
    ///
    /// # Errors
    ///
    /// Fails if the file does not exist or cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }

    fn write_from(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_range(offset, len, self.len)?;
        let mut buffer = vec![0; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if offset > self.len {
            return Err(StorageError::OutOfBounds {
                offset,
                len: data.len(),
                size: self.len,
            });
        }
        self.write_from(offset, data)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.len;
        self.write_from(offset, data)?;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.get_mut().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn leaves_are_patched_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users-age.idx");

        let mut file = FileBackend::create(&path).unwrap();
        let header = file.append(b"HEADER").unwrap();
        let leaf = file.append(&[0; 8]).unwrap();
        assert_eq!((header, leaf), (0, 6));
        file.write_at(leaf + 2, b"abcd").unwrap();
        file.sync().unwrap();
        drop(file);

        let file = FileBackend::open(&path).unwrap();
        assert_eq!(file.size().unwrap(), 14);
        assert_eq!(file.read_at(6, 8).unwrap(), [0, 0, b'a', b'b', b'c', b'd', 0, 0]);
    }

    #[test]
    fn header_patch_may_grow_the_file() {
        let dir = tempdir().unwrap();
        let mut file = FileBackend::create(&dir.path().join("a.idx")).unwrap();
        file.append(b"abc").unwrap();
        file.write_at(2, b"CDEF").unwrap();
        assert_eq!(file.read_at(0, 6).unwrap(), b"abCDEF");
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let dir = tempdir().unwrap();
        let mut file = FileBackend::create(&dir.path().join("a.idx")).unwrap();
        file.append(b"hello").unwrap();
        assert!(matches!(
            file.read_at(3, 5),
            Err(StorageError::OutOfBounds { offset: 3, len: 5, size: 5 })
        ));
        assert!(matches!(
            file.write_at(6, b"x"),
            Err(StorageError::OutOfBounds { .. })
        ));
        assert!(file.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn create_discards_a_stale_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users-age.idx.build");
        FileBackend::create(&path).unwrap().append(b"stale").unwrap();
        assert_eq!(FileBackend::create(&path).unwrap().size().unwrap(), 0);
    }

    #[test]
    fn open_requires_an_existing_file() {
        let dir = tempdir().unwrap();
        let missing = FileBackend::open(&dir.path().join("missing.idx"));
        assert!(matches!(missing, Err(StorageError::Io(_))));
    }
}
