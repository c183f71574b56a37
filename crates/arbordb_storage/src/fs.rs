//! File replacement helpers.
//!
//! Index files are never rewritten in place during a rebuild: the new tree
//! is written to a temporary file which then replaces the canonical file.
//! On some platforms the rename briefly fails with a permission error right
//! after the temporary file was closed, so the rename is retried.

use crate::error::StorageResult;
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Renames `from` to `to`, replacing `to` if it exists.
///
/// Permission-denied errors are retried up to `retries` times with `delay`
/// between attempts. Any other error is returned immediately.
///
/// # Errors
///
/// Returns the last I/O error if every attempt fails.
pub fn rename_with_retry(
    from: &Path,
    to: &Path,
    retries: u32,
    delay: Duration,
) -> StorageResult<()> {
    let mut attempt = 0;
    loop {
        match std::fs::rename(from, to) {
            Ok(()) => {
                debug!(from = %from.display(), to = %to.display(), "renamed file");
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied && attempt < retries => {
                attempt += 1;
                warn!(
                    from = %from.display(),
                    attempt,
                    "rename denied, retrying in {:?}",
                    delay
                );
                thread::sleep(delay);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Removes a file, treating "not found" as success.
///
/// Returns `true` if a file was removed.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be removed.
pub fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rename_replaces_target() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("index.idx.tmp");
        let to = dir.path().join("index.idx");
        std::fs::write(&from, b"new").unwrap();
        std::fs::write(&to, b"old").unwrap();

        rename_with_retry(&from, &to, 3, Duration::from_millis(1)).unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"new");
    }

    #[test]
    fn rename_missing_source_fails_without_retry() {
        let dir = tempdir().unwrap();
        let result = rename_with_retry(
            &dir.path().join("missing"),
            &dir.path().join("target"),
            3,
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }

    #[test]
    fn remove_if_exists_reports_removal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.1");
        std::fs::write(&path, b"x").unwrap();

        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }
}
