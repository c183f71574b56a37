//! The index base component.
//!
//! A [`DataIndex`] owns one index file: its lifecycle state, the open tree,
//! the query cache and the queue of updates that arrive while the tree is
//! being (re)built. Kind-specific behaviour is delegated to an
//! [`IndexVariant`].
//!
//! # Locking
//!
//! The tree is guarded by a named lock in the shared [`LockManager`]:
//! shared for reads, exclusive for updates and builds. Builds take the lock
//! as critical, so requests queued behind a build that overruns the lock
//! timeout are rejected instead of waiting on a stuck build.
//!
//! # Updates
//!
//! Record updates are translated into tree operations and applied as one
//! transaction. If a leaf has no room left, the tree is rebuilt with the
//! operations folded in, the file is replaced, and the transaction is
//! retried once. Updates that arrive while the index is not ready are
//! queued and replayed in arrival order before the index becomes ready.

use super::cache::QueryCache;
use super::descriptor::{IndexDescriptor, IndexKind};
use super::file::{open_index_file, write_index_file};
use super::query::{tree_query, QueryOperator, QueryOptions};
use super::results::{IndexQueryResult, IndexQueryResults, IndexQueryStats};
use super::state::{IndexState, Lifecycle, PendingUpdate};
use super::variant::{variant_for, EntrySet, IndexVariant};
use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::store::RecordStore;
use crate::text::lowercase;
use crate::tree::{BinaryTree, EntryValue, TreeError, TreeOp, TreeQuery};
use arbordb_codec::{
    truncate_utf8, IndexValue, Metadata, RecordKey, Value, MAX_STRING_LENGTH,
};
use arbordb_storage::{
    remove_if_exists, rename_with_retry, LockGuard, LockManager, LockMode, LockOptions,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

static NULL: Value = Value::Null;

/// Resources shared by the indexes of one database.
#[derive(Clone)]
pub struct IndexContext {
    pub(crate) dir: PathBuf,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) locks: LockManager,
    pub(crate) config: IndexConfig,
}

impl IndexContext {
    /// Creates a context for indexes stored in `dir`.
    pub fn new(dir: impl Into<PathBuf>, store: Arc<dyn RecordStore>, config: IndexConfig) -> Self {
        Self {
            dir: dir.into(),
            store,
            locks: LockManager::new(),
            config,
        }
    }

    /// Uses an existing lock table.
    #[must_use]
    pub fn with_locks(mut self, locks: LockManager) -> Self {
        self.locks = locks;
        self
    }

    /// Directory holding the index files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Engine configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Lock table.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }
}

impl fmt::Debug for IndexContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexContext")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Path of a build artifact next to an index file.
pub(crate) fn artifact_path(file: &Path, suffix: &str) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// A secondary index over the records at a wildcard path.
pub struct DataIndex {
    pub(super) descriptor: IndexDescriptor,
    pub(super) variant: Box<dyn IndexVariant>,
    pub(super) context: IndexContext,
    pub(super) file_path: PathBuf,
    lock_name: String,
    lifecycle: Mutex<Lifecycle>,
    state_changed: Condvar,
    tree: RwLock<Option<BinaryTree>>,
    cache: QueryCache,
}

impl fmt::Debug for DataIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataIndex")
            .field("description", &self.description())
            .field("file", &self.file_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DataIndex {
    /// Creates an index that has not been built yet.
    ///
    /// # Errors
    ///
    /// Fails if the variant cannot be set up (e.g. an invalid tokenizer
    /// pattern).
    pub fn new(context: IndexContext, descriptor: IndexDescriptor) -> IndexResult<Self> {
        let file_path = context.dir.join(descriptor.file_name());
        Self::with_state(context, descriptor, file_path, IndexState::Init, None)
    }

    /// Opens an existing index file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing or malformed.
    pub fn open(context: IndexContext, file: &Path) -> IndexResult<Self> {
        let (header, tree) = open_index_file(file)?;
        let descriptor = IndexDescriptor::from_info(&header.info)?;
        info!(
            index = %descriptor.description(),
            file = %file.display(),
            entries = tree.entry_count(),
            "index opened"
        );
        Self::with_state(
            context,
            descriptor,
            file.to_path_buf(),
            IndexState::Ready,
            Some(tree),
        )
    }

    fn with_state(
        context: IndexContext,
        descriptor: IndexDescriptor,
        file_path: PathBuf,
        state: IndexState,
        tree: Option<BinaryTree>,
    ) -> IndexResult<Self> {
        let variant = variant_for(&descriptor)?;
        let cache = QueryCache::new(context.config.cache_duration, context.config.cache_sliding);
        Ok(Self {
            lock_name: file_path.display().to_string(),
            descriptor,
            variant,
            context,
            file_path,
            lifecycle: Mutex::new(Lifecycle::new(state)),
            state_changed: Condvar::new(),
            tree: RwLock::new(tree),
            cache,
        })
    }

    /// The index definition.
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// Canonical description, e.g. `/users/*/age (normal)`.
    pub fn description(&self) -> String {
        self.descriptor.description()
    }

    /// Kind of index.
    pub fn kind(&self) -> IndexKind {
        self.variant.kind()
    }

    /// Path of the index file.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> IndexState {
        self.lifecycle.lock().state
    }

    /// The error of the last failed build, if the index is in error state.
    pub fn last_error(&self) -> Option<String> {
        self.lifecycle.lock().error.clone()
    }

    /// Number of updates waiting for the index to become ready.
    pub fn pending_updates(&self) -> usize {
        self.lifecycle.lock().pending.len()
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    fn transition(&self, lifecycle: &mut Lifecycle, next: IndexState) -> IndexResult<()> {
        if !lifecycle.state.can_become(next) {
            return Err(IndexError::invalid_operation(format!(
                "index cannot go from {} to {next}",
                lifecycle.state
            )));
        }
        debug!(index = %self.description(), from = %lifecycle.state, to = %next, "index state");
        lifecycle.state = next;
        self.state_changed.notify_all();
        Ok(())
    }

    fn fail(&self, err: &IndexError) {
        let mut lifecycle = self.lifecycle.lock();
        warn!(index = %self.description(), error = %err, "index failed");
        lifecycle.error = Some(err.to_string());
        let dropped = lifecycle.pending.len();
        lifecycle.pending.clear();
        if dropped > 0 {
            warn!(index = %self.description(), dropped, "queued updates dropped");
        }
        if lifecycle.state != IndexState::Error {
            lifecycle.state = IndexState::Error;
            self.state_changed.notify_all();
        }
    }

    /// Blocks while a build runs, then checks that the index is usable.
    fn settled(&self) -> IndexResult<()> {
        let deadline = Instant::now() + self.context.config.lock_timeout;
        let mut lifecycle = self.lifecycle.lock();
        while lifecycle.state.is_building() {
            if self
                .state_changed
                .wait_until(&mut lifecycle, deadline)
                .timed_out()
            {
                return Err(IndexError::invalid_operation(
                    "timed out waiting for the index build",
                ));
            }
        }
        match lifecycle.state {
            IndexState::Ready => Ok(()),
            IndexState::Error => Err(IndexError::BuildFailed {
                cause: lifecycle.error.clone().unwrap_or_default(),
            }),
            other => Err(IndexError::invalid_operation(format!("index is {other}"))),
        }
    }

    fn lock(&self, mode: LockMode, critical: bool) -> IndexResult<LockGuard> {
        let mut options = LockOptions::with_timeout(self.context.config.lock_timeout);
        if critical {
            options = options.critical();
        }
        Ok(self.context.locks.lock(&self.lock_name, mode, options)?)
    }

    fn read_tree<R>(&self, f: impl FnOnce(&BinaryTree) -> IndexResult<R>) -> IndexResult<R> {
        self.settled()?;
        let _guard = self.lock(LockMode::Shared, false)?;
        let tree = self.tree.read();
        let tree = tree
            .as_ref()
            .ok_or_else(|| IndexError::invalid_operation("index is not open"))?;
        f(tree)
    }

    fn write_tree<R>(
        &self,
        critical: bool,
        f: impl FnOnce(&mut Option<BinaryTree>) -> IndexResult<R>,
    ) -> IndexResult<R> {
        let _guard = self.lock(LockMode::Exclusive, critical)?;
        let mut tree = self.tree.write();
        f(&mut tree)
    }

    /// Builds the index from the record store, replacing any existing file.
    ///
    /// Updates received during the build are applied afterwards, in order.
    ///
    /// # Errors
    ///
    /// - [`IndexError::AlreadyBuilding`] if a build is running
    /// - any extraction, sort or write error; the index is then in
    ///   [`IndexState::Error`] until a later build succeeds
    pub fn build(&self) -> IndexResult<()> {
        let description = self.description();
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state.is_building() {
                return Err(IndexError::AlreadyBuilding.in_index(&description));
            }
            let next = if lifecycle.state == IndexState::Ready {
                IndexState::Rebuild
            } else {
                IndexState::Build
            };
            self.transition(&mut lifecycle, next)
                .map_err(|e| e.in_index(&description))?;
            lifecycle.error = None;
        }

        let started = Instant::now();
        info!(index = %description, "building index");
        let result = self.write_tree(true, |slot| {
            *slot = None;
            self.cache.clear();
            let tree = self.run_build_pipeline()?;
            let (_, opened) = open_index_file(&self.file_path)?;
            *slot = Some(opened);
            self.drain_pending(slot)?;
            Ok(tree)
        });
        match result {
            Ok(tree) => {
                info!(
                    index = %description,
                    entries = tree.entry_count,
                    values = tree.value_count,
                    elapsed_ms = started.elapsed().as_millis(),
                    "index built"
                );
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err.in_index(&description))
            }
        }
    }

    /// Releases the file handle. Queries fail until the index is reopened.
    ///
    /// # Errors
    ///
    /// Fails if the index lock cannot be acquired.
    pub fn close(&self) -> IndexResult<()> {
        self.write_tree(false, |slot| {
            *slot = None;
            self.cache.clear();
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == IndexState::Ready {
                self.transition(&mut lifecycle, IndexState::Closed)?;
            }
            Ok(())
        })
        .map_err(|e| e.in_index(&self.description()))
    }

    /// Closes the index and deletes its file.
    ///
    /// # Errors
    ///
    /// Fails if the index is building or the file cannot be deleted.
    pub fn remove(&self) -> IndexResult<()> {
        self.write_tree(false, |slot| {
            let mut lifecycle = self.lifecycle.lock();
            self.transition(&mut lifecycle, IndexState::Removed)?;
            *slot = None;
            self.cache.clear();
            lifecycle.pending.clear();
            drop(lifecycle);
            remove_if_exists(&self.file_path)?;
            info!(index = %self.description(), "index removed");
            Ok(())
        })
        .map_err(|e| e.in_index(&self.description()))
    }

    // ── updates ───────────────────────────────────────────────────────────

    /// Lowercases strings of case-insensitive indexes.
    pub(crate) fn normalize(&self, value: IndexValue, locale: &str) -> IndexValue {
        match value {
            IndexValue::String(s) if !self.descriptor.case_sensitive => {
                IndexValue::String(lowercase(&s, locale))
            }
            other => other,
        }
    }

    /// Normalizes a query argument using the index's default locale, cut
    /// to the stored key length.
    pub(crate) fn normalize_argument(&self, value: IndexValue) -> IndexValue {
        match self.normalize(value, &self.descriptor.locale) {
            IndexValue::String(s) => match truncate_utf8(&s, MAX_STRING_LENGTH) {
                Some(short) => IndexValue::String(short.to_string()),
                None => IndexValue::String(s),
            },
            other => other,
        }
    }

    fn truncate(&self, value: IndexValue, what: &str) -> IndexValue {
        match value {
            IndexValue::String(s) => match truncate_utf8(&s, MAX_STRING_LENGTH) {
                Some(short) => {
                    warn!(
                        index = %self.description(),
                        what,
                        length = s.len(),
                        "value truncated to {MAX_STRING_LENGTH} bytes"
                    );
                    IndexValue::String(short.to_string())
                }
                None => IndexValue::String(s),
            },
            other => other,
        }
    }

    /// The tree keys a record contributes, with their metadata.
    pub(crate) fn record_entries(
        &self,
        key: &RecordKey,
        record: Option<&Value>,
        extra: &Metadata,
    ) -> IndexResult<EntrySet> {
        let mut entries = EntrySet::new();
        let Some(record) = record.filter(|r| !r.is_null()) else {
            return Ok(entries);
        };
        let descriptor = &self.descriptor;

        let own_key;
        let value = if descriptor.indexes_record_key() {
            own_key = match key {
                RecordKey::Name(name) => Value::String(name.clone()),
                RecordKey::Index(index) => Value::Number(f64::from(*index)),
            };
            &own_key
        } else {
            record.get(&descriptor.key).unwrap_or(&NULL)
        };

        let locale = descriptor
            .locale_key
            .as_ref()
            .and_then(|k| record.get(k))
            .and_then(Value::as_str)
            .unwrap_or(descriptor.locale.as_str());

        let mut included = Metadata::new();
        for name in &descriptor.include {
            if let Some(v) = record.get(name).and_then(IndexValue::from_value) {
                included.insert(name.clone(), self.truncate(v, name));
            }
        }
        included.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        for (extracted, metadata) in self.variant.extract(descriptor, value, locale)? {
            let key = self.truncate(self.normalize(extracted, locale), &descriptor.key);
            let mut merged = included.clone();
            merged.extend(metadata);
            entries.entry(key).or_insert(merged);
        }
        Ok(entries)
    }

    /// Applies a change of the record at `path` to the index.
    ///
    /// `old` and `new` are the record's values before and after the change
    /// (`None` for an absent record). If the index is not ready yet, the
    /// change is queued and applied once the running build completes.
    ///
    /// # Errors
    ///
    /// Fails if `path` is not a record of this index, if the index is in
    /// error state or closed, or if the tree cannot be updated.
    pub fn handle_record_update(
        &self,
        path: &str,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> IndexResult<()> {
        self.handle_record_update_with(path, old, new, &Metadata::new())
    }

    /// Like [`DataIndex::handle_record_update`], storing `metadata` with
    /// the record's new entries.
    ///
    /// # Errors
    ///
    /// See [`DataIndex::handle_record_update`].
    pub fn handle_record_update_with(
        &self,
        path: &str,
        old: Option<&Value>,
        new: Option<&Value>,
        metadata: &Metadata,
    ) -> IndexResult<()> {
        self.update(path, old, new, metadata)
            .map_err(|e| e.in_index(&self.description()))
    }

    fn update(
        &self,
        path: &str,
        old: Option<&Value>,
        new: Option<&Value>,
        metadata: &Metadata,
    ) -> IndexResult<()> {
        let pointer = self.descriptor.path.match_record(path).ok_or_else(|| {
            IndexError::invalid_argument(format!("\"{path}\" is not a record of this index"))
        })?;
        let old_entries = self.record_entries(&pointer.key, old, &Metadata::new())?;
        let new_entries = self.record_entries(&pointer.key, new, metadata)?;
        let ops = self
            .variant
            .delta(&old_entries, &new_entries, &pointer.encode()?);
        if ops.is_empty() {
            trace!(index = %self.description(), path, "update does not change the index");
            return Ok(());
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                IndexState::Ready => {}
                IndexState::Init | IndexState::Build | IndexState::Rebuild => {
                    lifecycle.pending.push_back(PendingUpdate {
                        path: path.to_string(),
                        ops,
                    });
                    let queued = lifecycle.pending.len();
                    if queued > self.context.config.max_pending_updates {
                        warn!(index = %self.description(), queued, "update queue is growing");
                    } else {
                        trace!(index = %self.description(), path, queued, "update queued");
                    }
                    return Ok(());
                }
                IndexState::Error => {
                    return Err(IndexError::BuildFailed {
                        cause: lifecycle.error.clone().unwrap_or_default(),
                    })
                }
                other => {
                    return Err(IndexError::invalid_operation(format!("index is {other}")))
                }
            }
        }

        self.write_tree(false, |slot| {
            self.apply(slot, &ops)?;
            self.drain_pending(slot)
        })
    }

    /// Applies queued updates in order, then marks the index ready.
    fn drain_pending(&self, slot: &mut Option<BinaryTree>) -> IndexResult<()> {
        loop {
            let next = {
                let mut lifecycle = self.lifecycle.lock();
                match lifecycle.pending.pop_front() {
                    Some(update) => update,
                    None => {
                        if lifecycle.state.is_building() {
                            self.transition(&mut lifecycle, IndexState::Ready)?;
                        }
                        return Ok(());
                    }
                }
            };
            debug!(index = %self.description(), path = %next.path, "replaying queued update");
            self.apply(slot, &next.ops)?;
        }
    }

    /// Applies one transaction, rebuilding the tree once on leaf overflow.
    fn apply(&self, slot: &mut Option<BinaryTree>, ops: &[TreeOp]) -> IndexResult<()> {
        let tree = slot
            .as_mut()
            .ok_or_else(|| IndexError::invalid_operation("index is not open"))?;
        match tree.transaction(ops) {
            Ok(()) => {
                self.cache.clear();
                return Ok(());
            }
            Err(TreeError::NeedsRebuild {
                leaf,
                required,
                capacity,
            }) => {
                warn!(
                    index = %self.description(),
                    leaf,
                    required,
                    capacity,
                    "leaf overflow, rebuilding index"
                );
            }
            Err(other) => return Err(other.into()),
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == IndexState::Ready {
                self.transition(&mut lifecycle, IndexState::Rebuild)?;
            }
        }
        let retried = self.rebuild(slot).and_then(|()| {
            let tree = slot
                .as_mut()
                .ok_or_else(|| IndexError::internal("tree missing after rebuild"))?;
            match tree.transaction(ops) {
                Ok(()) => Ok(()),
                Err(TreeError::NeedsRebuild { leaf, required, capacity }) => {
                    Err(IndexError::internal(format!(
                        "leaf {leaf} overflowed again after rebuilding \
                         ({required} of {capacity} bytes)"
                    )))
                }
                Err(other) => Err(other.into()),
            }
        });
        match retried {
            Ok(()) => {
                self.cache.clear();
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Rewrites the tree with free space in every leaf and swaps the file.
    fn rebuild(&self, slot: &mut Option<BinaryTree>) -> IndexResult<()> {
        let config = &self.context.config;
        let temp = artifact_path(&self.file_path, "tmp");
        let started = Instant::now();
        let info = {
            let tree = slot
                .as_ref()
                .ok_or_else(|| IndexError::invalid_operation("index is not open"))?;
            write_index_file(
                &temp,
                &self.descriptor,
                config.rebuild_fill_factor,
                config.leaf_size,
                |builder| Ok(tree.rebuild_into(builder, &[])?),
            )?
        };
        *slot = None;
        rename_with_retry(
            &temp,
            &self.file_path,
            config.rename_retries,
            config.rename_retry_delay,
        )?;
        let (_, tree) = open_index_file(&self.file_path)?;
        *slot = Some(tree);
        self.cache.clear();
        info!(
            index = %self.description(),
            leaves = info.leaf_count,
            entries = info.entry_count,
            elapsed_ms = started.elapsed().as_millis(),
            "index rebuilt"
        );
        Ok(())
    }

    // ── queries ───────────────────────────────────────────────────────────

    fn operator(&self, op: &str) -> IndexResult<QueryOperator> {
        QueryOperator::parse(op)
            .filter(|o| self.variant.valid_operators().contains(o))
            .ok_or_else(|| IndexError::UnsupportedOperator {
                operator: op.to_string(),
                kind: self.kind().as_str(),
            })
    }

    /// Runs a query.
    ///
    /// Unfiltered results are cached until the next write to the index.
    ///
    /// # Errors
    ///
    /// - [`IndexError::UnsupportedOperator`] if this kind of index does not
    ///   support `op`
    /// - [`IndexError::InvalidArgument`] if `arg` has the wrong shape
    /// - [`IndexError::BuildFailed`] if the last build failed
    pub fn query(
        &self,
        op: &str,
        arg: &Value,
        options: &QueryOptions<'_>,
    ) -> IndexResult<IndexQueryResults> {
        self.run_query(op, arg, options)
            .map_err(|e| e.in_index(&self.description()))
    }

    fn run_query(
        &self,
        op: &str,
        arg: &Value,
        options: &QueryOptions<'_>,
    ) -> IndexResult<IndexQueryResults> {
        let operator = self.operator(op)?;
        let argument = arg.canonical_string();
        let cacheable = options.filter.is_none();
        if cacheable {
            if let Some(hit) = self.cache.get(op, &argument) {
                return Ok(hit);
            }
        }
        let generation = self.cache.generation();
        let results = self.variant.query(self, operator, arg, options)?;
        debug!(
            index = %self.description(),
            op,
            argument = %argument,
            results = results.len(),
            elapsed_us = results.stats.duration.as_micros(),
            "query"
        );
        if cacheable {
            self.cache.insert(generation, op, &argument, &results);
        }
        Ok(results)
    }

    /// Returns every record none of whose entries is rejected by
    /// `blacklisted`. Results are never cached.
    ///
    /// # Errors
    ///
    /// Fails if the index is not ready.
    pub fn query_blacklist<F>(
        &self,
        blacklisted: F,
        options: &QueryOptions<'_>,
    ) -> IndexResult<IndexQueryResults>
    where
        F: Fn(&IndexValue, &Metadata) -> bool,
    {
        let stats = IndexQueryStats::new("blacklist", String::new());
        self.scan_excluding(|key, value| blacklisted(key, &value.metadata), options, stats)
            .map_err(|e| e.in_index(&self.description()))
    }

    /// Number of matching values.
    ///
    /// # Errors
    ///
    /// See [`DataIndex::query`].
    pub fn count(&self, op: &str, arg: &Value) -> IndexResult<usize> {
        let run = || -> IndexResult<usize> {
            let operator = self.operator(op)?;
            if QueryOperator::BASE.contains(&operator) {
                let query = tree_query(
                    operator,
                    arg,
                    &|v| self.normalize_argument(v),
                    self.descriptor.case_sensitive,
                )?;
                self.count_query(&query)
            } else {
                Ok(self.run_query(op, arg, &QueryOptions::default())?.len())
            }
        };
        run().map_err(|e| e.in_index(&self.description()))
    }

    /// Returns up to `take` values after skipping `skip`, walking the index
    /// from its first (ascending) or last key.
    ///
    /// # Errors
    ///
    /// Fails if the index is not ready.
    pub fn take(&self, skip: usize, take: usize, ascending: bool) -> IndexResult<IndexQueryResults> {
        let started = Instant::now();
        let direction = if ascending { "asc" } else { "desc" };
        let mut stats = IndexQueryStats::new("take", format!("{skip},{take},{direction}"));
        stats.queries = 1;
        self.read_tree(|tree| {
            let picked: Vec<(&IndexValue, &EntryValue)> = if ascending {
                tree.entries()
                    .flat_map(|e| e.values.iter().map(move |v| (&e.key, v)))
                    .skip(skip)
                    .take(take)
                    .collect()
            } else {
                tree.entries()
                    .rev()
                    .flat_map(|e| e.values.iter().rev().map(move |v| (&e.key, v)))
                    .skip(skip)
                    .take(take)
                    .collect()
            };
            let results = picked
                .into_iter()
                .map(|(key, value)| self.to_result(key, value))
                .collect::<IndexResult<Vec<_>>>()?;
            stats.finish(started, results.len());
            Ok(IndexQueryResults::new(results, stats))
        })
        .map_err(|e| e.in_index(&self.description()))
    }

    /// Evaluates an operator against an indexed value directly.
    ///
    /// # Errors
    ///
    /// Fails for unsupported operators or malformed arguments.
    pub fn test(&self, value: &Value, op: &str, arg: &Value) -> IndexResult<bool> {
        let run = || -> IndexResult<bool> {
            let operator = self.operator(op)?;
            self.variant.test(self, value, operator, arg)
        };
        run().map_err(|e| e.in_index(&self.description()))
    }

    fn to_result(&self, key: &IndexValue, value: &EntryValue) -> IndexResult<IndexQueryResult> {
        let pointer = value.record_pointer()?;
        let path = self.descriptor.path.resolve(&pointer)?;
        Ok(IndexQueryResult::new(
            pointer.key,
            path,
            key.clone(),
            value.metadata.clone(),
            value.pointer.clone(),
        ))
    }

    /// Expands matched values into results, one per record.
    ///
    /// With a filter, only records present in the filter are kept; the
    /// smaller side is indexed by record pointer for the intersection.
    fn assemble(
        &self,
        matches: Vec<(&IndexValue, &EntryValue)>,
        filter: Option<&IndexQueryResults>,
    ) -> IndexResult<Vec<IndexQueryResult>> {
        let Some(filter) = filter else {
            let mut seen: HashSet<&[u8]> = HashSet::with_capacity(matches.len());
            return matches
                .into_iter()
                .filter(|(_, value)| seen.insert(value.pointer.as_slice()))
                .map(|(key, value)| self.to_result(key, value))
                .collect();
        };

        if filter.len() <= matches.len() {
            let allowed: BTreeSet<&[u8]> = filter.iter().map(IndexQueryResult::pointer).collect();
            let mut seen: HashSet<&[u8]> = HashSet::new();
            matches
                .into_iter()
                .filter(|(_, value)| {
                    allowed.contains(value.pointer.as_slice()) && seen.insert(value.pointer.as_slice())
                })
                .map(|(key, value)| self.to_result(key, value))
                .collect()
        } else {
            let mut found: BTreeMap<&[u8], (&IndexValue, &EntryValue)> = BTreeMap::new();
            for (key, value) in matches {
                found.entry(value.pointer.as_slice()).or_insert((key, value));
            }
            filter
                .iter()
                .filter_map(|r| found.remove(r.pointer()))
                .map(|(key, value)| self.to_result(key, value))
                .collect()
        }
    }

    /// Searches the tree and assembles the results.
    pub(crate) fn search(
        &self,
        query: &TreeQuery,
        options: &QueryOptions<'_>,
        mut stats: IndexQueryStats,
    ) -> IndexResult<IndexQueryResults> {
        let started = Instant::now();
        self.read_tree(|tree| {
            let matches = tree
                .search(query)
                .into_iter()
                .flat_map(|e| e.values.iter().map(move |v| (&e.key, v)))
                .collect();
            let results = self.assemble(matches, options.filter)?;
            stats.queries = 1;
            stats.finish(started, results.len());
            Ok(IndexQueryResults::new(results, stats))
        })
    }

    /// Number of values matching a tree search.
    pub(crate) fn count_query(&self, query: &TreeQuery) -> IndexResult<usize> {
        self.read_tree(|tree| Ok(tree.count(query)))
    }

    /// Returns every record with no value rejected by `blacklisted`.
    pub(crate) fn scan_excluding<F>(
        &self,
        blacklisted: F,
        options: &QueryOptions<'_>,
        mut stats: IndexQueryStats,
    ) -> IndexResult<IndexQueryResults>
    where
        F: Fn(&IndexValue, &EntryValue) -> bool,
    {
        let started = Instant::now();
        self.read_tree(|tree| {
            let kept = tree.scan_excluding(blacklisted);
            let results = self.assemble(kept, options.filter)?;
            stats.queries = 1;
            stats.finish(started, results.len());
            Ok(IndexQueryResults::new(results, stats))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexOptions;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn setup(config: IndexConfig) -> (tempfile::TempDir, Arc<MemoryStore>, IndexContext) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_root(Value::from(json!({
            "users": {
                "ewout": { "name": "Ewout", "age": 42, "city": "Amsterdam" },
                "annet": { "name": "Annet", "age": 38, "city": "Utrecht" },
                "pete": { "name": "Pete", "age": 19 }
            }
        }))));
        let context = IndexContext::new(dir.path(), store.clone(), config);
        (dir, store, context)
    }

    fn index(context: &IndexContext, key: &str, options: IndexOptions) -> DataIndex {
        let descriptor = IndexDescriptor::new("users", key, options).unwrap();
        DataIndex::new(context.clone(), descriptor).unwrap()
    }

    fn paths(results: &IndexQueryResults) -> Vec<&str> {
        let mut paths = results.paths();
        paths.sort_unstable();
        paths
    }

    #[test]
    fn build_then_query() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "age", IndexOptions::default());
        assert_eq!(index.state(), IndexState::Init);
        index.build().unwrap();
        assert_eq!(index.state(), IndexState::Ready);
        assert!(index.file_path().exists());

        let results = index
            .query(">", &Value::from(20), &QueryOptions::default())
            .unwrap();
        assert_eq!(paths(&results), vec!["users/annet", "users/ewout"]);
        assert_eq!(index.count("<", &Value::from(40)).unwrap(), 2);
    }

    #[test]
    fn overflow_after_rebuild_puts_index_in_error_state() {
        let (_dir, _store, context) = setup(IndexConfig::default().leaf_size(128));
        let index = index(&context, "name", IndexOptions::default());
        index.build().unwrap();

        // No leaf, rebuilt or not, has room for this key.
        let huge = Value::from(json!({ "name": "z".repeat(250) }));
        let err = index
            .handle_record_update("users/zed", None, Some(&huge))
            .unwrap_err();
        assert!(matches!(err.root(), IndexError::Internal { .. }));
        assert_eq!(index.state(), IndexState::Error);
        assert!(index.last_error().unwrap().contains("overflowed again"));

        let next = Value::from(json!({ "name": "Zed" }));
        let err = index
            .handle_record_update("users/zed", None, Some(&next))
            .unwrap_err();
        assert!(matches!(err.root(), IndexError::BuildFailed { .. }));
        assert_eq!(index.pending_updates(), 0);
        let err = index
            .query("==", &Value::from("pete"), &QueryOptions::default())
            .unwrap_err();
        assert!(matches!(err.root(), IndexError::BuildFailed { .. }));

        index.build().unwrap();
        assert_eq!(index.state(), IndexState::Ready);
        assert_eq!(index.last_error(), None);
    }

    #[test]
    fn unsupported_operator_names_the_index() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "age", IndexOptions::default());
        index.build().unwrap();
        let err = index
            .query("contains", &Value::from(1), &QueryOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("/users/*/age"));
        assert!(matches!(err.root(), IndexError::UnsupportedOperator { .. }));
    }

    #[test]
    fn included_keys_become_metadata() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "age", IndexOptions::default().include(["city"]));
        index.build().unwrap();
        let results = index
            .query("==", &Value::from(42), &QueryOptions::default())
            .unwrap();
        assert_eq!(
            results.results[0].metadata.get("city"),
            Some(&IndexValue::from("Amsterdam"))
        );
        let filtered = index
            .query(">", &Value::from(0), &QueryOptions::default())
            .unwrap()
            .filter_metadata("city", |v| v.is_some());
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn case_insensitive_by_default() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "name", IndexOptions::default());
        index.build().unwrap();
        let results = index
            .query("==", &Value::from("EWOUT"), &QueryOptions::default())
            .unwrap();
        assert_eq!(results.paths(), vec!["users/ewout"]);
        assert_eq!(results.results[0].value, IndexValue::from("ewout"));
    }

    #[test]
    fn record_key_index() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "{key}", IndexOptions::default().case_sensitive(true));
        index.build().unwrap();
        let results = index
            .query("like", &Value::from("*e*"), &QueryOptions::default())
            .unwrap();
        assert_eq!(paths(&results), vec!["users/annet", "users/ewout", "users/pete"]);
    }

    #[test]
    fn filter_intersects_results() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let ages = index(&context, "age", IndexOptions::default());
        let names = index(&context, "name", IndexOptions::default());
        ages.build().unwrap();
        names.build().unwrap();

        let adults = ages
            .query(">=", &Value::from(21), &QueryOptions::default())
            .unwrap();
        let named = names
            .query("like", &Value::from("*e*"), &QueryOptions::filter(&adults))
            .unwrap();
        assert_eq!(paths(&named), vec!["users/annet", "users/ewout"]);

        let one = names
            .query("==", &Value::from("pete"), &QueryOptions::default())
            .unwrap();
        let none = ages
            .query(">", &Value::from(0), &QueryOptions::filter(&one))
            .unwrap();
        assert_eq!(none.paths(), vec!["users/pete"]);
    }

    #[test]
    fn take_walks_both_directions() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "age", IndexOptions::default());
        index.build().unwrap();
        let first = index.take(0, 2, true).unwrap();
        assert_eq!(first.paths(), vec!["users/pete", "users/annet"]);
        let last = index.take(0, 1, false).unwrap();
        assert_eq!(last.paths(), vec!["users/ewout"]);
        let skipped = index.take(2, 10, true).unwrap();
        assert_eq!(skipped.paths(), vec!["users/ewout"]);
    }

    #[test]
    fn updates_apply_and_clear_the_cache() {
        let (_dir, store, context) = setup(IndexConfig::default());
        let index = index(&context, "age", IndexOptions::default());
        index.build().unwrap();
        let before = index
            .query("==", &Value::from(50), &QueryOptions::default())
            .unwrap();
        assert!(before.is_empty());

        let old = store.get("users/pete");
        let new = Value::from(json!({ "name": "Pete", "age": 50 }));
        store.set("users/pete", new.clone()).unwrap();
        index
            .handle_record_update("users/pete", old.as_ref(), Some(&new))
            .unwrap();

        let after = index
            .query("==", &Value::from(50), &QueryOptions::default())
            .unwrap();
        assert_eq!(after.paths(), vec!["users/pete"]);
        assert!(index
            .query("==", &Value::from(19), &QueryOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unrelated_changes_are_ignored() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "age", IndexOptions::default());
        index.build().unwrap();
        let old = Value::from(json!({ "age": 19, "name": "Pete" }));
        let new = Value::from(json!({ "age": 19, "name": "Peter" }));
        let path = "users/pete";
        let key = RecordKey::from("pete");
        assert_eq!(
            index.record_entries(&key, Some(&old), &Metadata::new()).unwrap(),
            index.record_entries(&key, Some(&new), &Metadata::new()).unwrap()
        );
        index.handle_record_update(path, Some(&old), Some(&new)).unwrap();
        let err = index.handle_record_update("other/pete", Some(&old), Some(&new));
        assert!(err.is_err());
    }

    #[test]
    fn updates_before_build_are_queued() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "age", IndexOptions::default());
        let new = Value::from(json!({ "age": 7 }));
        index
            .handle_record_update("users/kid", None, Some(&new))
            .unwrap();
        assert_eq!(index.pending_updates(), 1);
        index.build().unwrap();
        assert_eq!(index.pending_updates(), 0);
        let results = index
            .query("==", &Value::from(7), &QueryOptions::default())
            .unwrap();
        assert_eq!(results.paths(), vec!["users/kid"]);
    }

    #[test]
    fn overflow_rebuilds_transparently() {
        let config = IndexConfig::default().leaf_size(128).fill_factors(100, 50);
        let (_dir, _store, context) = setup(config);
        let index = index(&context, "age", IndexOptions::default());
        index.build().unwrap();
        for n in 0..60 {
            let value = Value::from(json!({ "age": 100 + n }));
            index
                .handle_record_update(&format!("users/u{n}"), None, Some(&value))
                .unwrap();
        }
        assert_eq!(index.state(), IndexState::Ready);
        assert_eq!(index.count(">=", &Value::from(100)).unwrap(), 60);
        assert_eq!(index.count(">", &Value::from(0)).unwrap(), 63);
    }

    #[test]
    fn closed_and_removed_indexes_reject_queries() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let index = index(&context, "age", IndexOptions::default());
        index.build().unwrap();
        index.close().unwrap();
        assert_eq!(index.state(), IndexState::Closed);
        assert!(index.query("==", &Value::from(1), &QueryOptions::default()).is_err());

        index.remove().unwrap();
        assert_eq!(index.state(), IndexState::Removed);
        assert!(!index.file_path().exists());
        assert!(index.build().is_err());
    }

    #[test]
    fn reopened_index_is_ready() {
        let (_dir, _store, context) = setup(IndexConfig::default());
        let built = index(&context, "age", IndexOptions::default());
        built.build().unwrap();
        built.close().unwrap();

        let opened = DataIndex::open(context.clone(), built.file_path()).unwrap();
        assert_eq!(opened.state(), IndexState::Ready);
        assert_eq!(opened.description(), built.description());
        assert_eq!(opened.count(">", &Value::from(0)).unwrap(), 3);
    }

    #[test]
    fn blacklist_query_bypasses_the_cache() {
        let (_dir, _store, context) = setup(IndexConfig::default().cache_duration(Duration::from_secs(60)));
        let index = index(&context, "age", IndexOptions::default());
        index.build().unwrap();
        let results = index
            .query_blacklist(|key, _| key.as_f64() == Some(42.0), &QueryOptions::default())
            .unwrap();
        assert_eq!(paths(&results), vec!["users/annet", "users/pete"]);
        assert_eq!(index.cache.len(), 0);
    }
}
