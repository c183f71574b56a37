//! The set of indexes of one database.
//!
//! An [`IndexRegistry`] owns the index directory:
//!
//! ```text
//! <index dir>/
//! ├─ LOCK                          # advisory lock, one registry per directory
//! ├─ users~#-age.idx               # one file per index
//! └─ users~#~posts-title.fulltext.idx
//! ```
//!
//! Record mutations are routed through [`IndexRegistry::handle_record_update`],
//! which forwards them to every index whose path pattern matches the record.

use crate::config::{IndexConfig, IndexOptions};
use crate::error::{IndexError, IndexResult};
use crate::index::{DataIndex, IndexContext, IndexDescriptor, IndexState};
use crate::path::PathPattern;
use crate::store::RecordStore;
use arbordb_codec::{Metadata, Value};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const LOCK_FILE: &str = "LOCK";
const INDEX_EXTENSION: &str = "idx";

/// Owns the index directory and every index in it.
///
/// # Example
///
/// ```rust,ignore
/// let registry = IndexRegistry::open(dir, store, IndexConfig::default())?;
/// registry.load()?;
/// let ages = registry.create("users", "age", IndexOptions::default())?;
/// let adults = ages.query(">=", &Value::from(18), &QueryOptions::default())?;
/// ```
pub struct IndexRegistry {
    context: IndexContext,
    indexes: RwLock<Vec<Arc<DataIndex>>>,
    _lock_file: File,
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("dir", &self.context.dir())
            .field("indexes", &self.indexes.read().len())
            .finish_non_exhaustive()
    }
}

impl IndexRegistry {
    /// Opens the index directory, creating it if needed.
    ///
    /// Existing index files are not opened until [`IndexRegistry::load`]
    /// is called.
    ///
    /// # Errors
    ///
    /// - [`IndexError::DirectoryLocked`] if another registry holds the
    ///   directory
    /// - I/O errors creating the directory or lock file
    pub fn open(
        dir: impl AsRef<Path>,
        store: Arc<dyn RecordStore>,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            return Err(IndexError::invalid_argument(format!(
                "index path is not a directory: {}",
                dir.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(IndexError::DirectoryLocked {
                path: dir.to_path_buf(),
            });
        }

        Ok(Self {
            context: IndexContext::new(dir, store, config),
            indexes: RwLock::new(Vec::new()),
            _lock_file: lock_file,
        })
    }

    /// Shared resources handed to every index.
    pub fn context(&self) -> &IndexContext {
        &self.context
    }

    /// Opens every index file in the directory that is not loaded yet.
    ///
    /// Files that cannot be opened are skipped with a warning. Returns the
    /// number of indexes opened.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be listed.
    pub fn load(&self) -> IndexResult<usize> {
        let mut files: Vec<_> = fs::read_dir(self.context.dir())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(INDEX_EXTENSION)
            })
            .collect();
        files.sort();

        let mut opened = 0;
        for file in files {
            if self
                .indexes
                .read()
                .iter()
                .any(|index| index.file_path() == file)
            {
                continue;
            }
            match DataIndex::open(self.context.clone(), &file) {
                Ok(index) => {
                    self.indexes.write().push(Arc::new(index));
                    opened += 1;
                }
                Err(err) => {
                    warn!(file = %file.display(), error = %err, "skipping unreadable index file");
                }
            }
        }
        info!(dir = %self.context.dir().display(), opened, "indexes loaded");
        Ok(opened)
    }

    /// Creates and builds an index on `key` of the records at `path`.
    ///
    /// The index is registered before it is built, so record updates that
    /// arrive during the build are queued by the index and applied when it
    /// becomes ready. An index whose build fails stays registered in
    /// [`IndexState::Error`](crate::IndexState::Error), with the cause in
    /// [`DataIndex::last_error`]; creating it again retries the build, and
    /// [`IndexRegistry::remove`] discards it.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidOperation`] if an identical index exists
    /// - [`IndexError::InvalidArgument`] for an invalid path, key or option
    /// - any build error
    pub fn create(
        &self,
        path: &str,
        key: &str,
        options: IndexOptions,
    ) -> IndexResult<Arc<DataIndex>> {
        let descriptor = IndexDescriptor::new(path, key, options)?;
        let index = {
            let mut indexes = self.indexes.write();
            let file_name = descriptor.file_name();
            match indexes
                .iter()
                .find(|index| index.descriptor().file_name() == file_name)
            {
                Some(failed) if failed.state() == IndexState::Error => Arc::clone(failed),
                Some(existing) => {
                    return Err(IndexError::invalid_operation(format!(
                        "index {} already exists",
                        existing.description()
                    )));
                }
                None => {
                    let index = Arc::new(DataIndex::new(self.context.clone(), descriptor)?);
                    indexes.push(Arc::clone(&index));
                    index
                }
            }
        };

        if let Err(err) = index.build() {
            error!(index = %index.description(), error = %err, "index creation failed");
            return Err(err);
        }
        Ok(index)
    }

    /// Indexes on `key` of the records at `path`, of any kind.
    ///
    /// # Errors
    ///
    /// Fails if `path` is not a valid pattern.
    pub fn get(&self, path: &str, key: &str) -> IndexResult<Vec<Arc<DataIndex>>> {
        let pattern = PathPattern::parse(path)?;
        Ok(self
            .indexes
            .read()
            .iter()
            .filter(|index| index.descriptor().path == pattern && index.descriptor().key == key)
            .cloned()
            .collect())
    }

    /// Every registered index.
    pub fn list(&self) -> Vec<Arc<DataIndex>> {
        self.indexes.read().clone()
    }

    /// Indexes that `record_path` is a record of.
    pub fn for_path(&self, record_path: &str) -> Vec<Arc<DataIndex>> {
        self.indexes
            .read()
            .iter()
            .filter(|index| index.descriptor().path.match_record(record_path).is_some())
            .cloned()
            .collect()
    }

    /// Forwards a record change to every index of the record.
    ///
    /// All indexes are updated even if one of them fails; the first error
    /// is returned.
    ///
    /// # Errors
    ///
    /// See [`DataIndex::handle_record_update`].
    pub fn handle_record_update(
        &self,
        record_path: &str,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> IndexResult<()> {
        self.handle_record_update_with(record_path, old, new, &Metadata::new())
    }

    /// Like [`IndexRegistry::handle_record_update`], storing `metadata`
    /// with the record's new entries.
    ///
    /// # Errors
    ///
    /// See [`DataIndex::handle_record_update`].
    pub fn handle_record_update_with(
        &self,
        record_path: &str,
        old: Option<&Value>,
        new: Option<&Value>,
        metadata: &Metadata,
    ) -> IndexResult<()> {
        let targets = self.for_path(record_path);
        debug!(path = record_path, indexes = targets.len(), "record update");
        let mut first_error = None;
        for index in targets {
            if let Err(err) = index.handle_record_update_with(record_path, old, new, metadata) {
                warn!(path = record_path, error = %err, "index update failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Removes every index on `key` of the records at `path` and deletes
    /// their files. Returns the number of indexes removed.
    ///
    /// # Errors
    ///
    /// Fails if `path` is invalid or an index is building.
    pub fn remove(&self, path: &str, key: &str) -> IndexResult<usize> {
        let targets = self.get(path, key)?;
        for index in &targets {
            index.remove()?;
            self.unregister(index);
        }
        Ok(targets.len())
    }

    /// Closes every index. The registry is empty afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first close error; the remaining indexes are still
    /// closed.
    pub fn close(&self) -> IndexResult<()> {
        let indexes = std::mem::take(&mut *self.indexes.write());
        let mut first_error = None;
        for index in indexes {
            if let Err(err) = index.close() {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
