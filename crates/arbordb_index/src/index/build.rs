//! External sort-merge build pipeline.
//!
//! ```text
//! extract  records ──▶ <file>.build        (unsorted key/value frames)
//! group    .build   ──▶ <file>.sort.N      (sorted, grouped by key)
//!                       <file>.batches     (batch count, marks grouping done)
//! merge    .sort.*  ──▶ <file>.tmp ──▶ <file>
//! ```
//!
//! Every artifact is written under a temporary name and renamed when
//! complete, so an interrupted build resumes from the last finished phase.
//! All frames are `length(4B) payload`.

use super::base::{artifact_path, DataIndex};
use super::file::write_index_file;
use crate::error::{IndexError, IndexResult};
use crate::path::{child_path, PathSegment};
use crate::store::ChildInfo;
use crate::tree::{EntryValue, TreeBuilder, TreeEntry, TreeInfo};
use arbordb_codec::{Decoder, Encoder, IndexValue, Metadata};
use arbordb_storage::{remove_if_exists, rename_with_retry, FileBackend, StorageBackend};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 64 * 1024;

/// A node whose remaining pattern segments still have to be walked.
struct Frame {
    path: String,
    next: usize,
    depth: usize,
}

/// Sequential reader over a frame file.
struct FrameReader {
    backend: FileBackend,
    size: u64,
    offset: u64,
    buf: Vec<u8>,
    pos: usize,
}

impl FrameReader {
    fn open(path: &Path) -> IndexResult<Self> {
        let backend = FileBackend::open(path)?;
        let size = backend.size()?;
        Ok(Self {
            backend,
            size,
            offset: 0,
            buf: Vec::new(),
            pos: 0,
        })
    }

    fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn fill(&mut self, needed: usize) -> IndexResult<()> {
        while self.buffered() < needed {
            let left = self.size - self.offset;
            if left == 0 {
                return Err(IndexError::invalid_format("build artifact ends mid-frame"));
            }
            let want = u64::try_from(READ_CHUNK.max(needed))
                .map_or(left, |w| w.min(left));
            let chunk = self.backend.read_at(self.offset, want as usize)?;
            self.buf.drain(..self.pos);
            self.pos = 0;
            self.buf.extend_from_slice(&chunk);
            self.offset += want;
        }
        Ok(())
    }

    fn next_frame(&mut self) -> IndexResult<Option<&[u8]>> {
        if self.buffered() == 0 && self.offset >= self.size {
            return Ok(None);
        }
        self.fill(4)?;
        let len_bytes: [u8; 4] = self.buf[self.pos..self.pos + 4]
            .try_into()
            .map_err(|_| IndexError::internal("frame length slice"))?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        self.pos += 4;
        self.fill(len)?;
        let frame = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(Some(frame))
    }

    fn next_entry(&mut self) -> IndexResult<Option<TreeEntry>> {
        match self.next_frame()? {
            Some(frame) => Ok(Some(TreeEntry::decode(&mut Decoder::new(frame))?)),
            None => Ok(None),
        }
    }
}

fn push_frame(out: &mut Vec<u8>, payload: &[u8]) -> IndexResult<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| IndexError::internal("build frame exceeds 4 GiB"))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

fn sort_path(file: &Path, batch: usize) -> PathBuf {
    artifact_path(file, &format!("sort.{batch}"))
}

fn worker_count() -> usize {
    thread::available_parallelism().map_or(1, usize::from)
}

#[derive(Debug, Default)]
struct ExtractStats {
    records: usize,
    entries: usize,
}

impl DataIndex {
    /// Runs the three build phases and writes the index file.
    ///
    /// The index file is replaced by rename once complete; artifacts are
    /// deleted on success only.
    pub(super) fn run_build_pipeline(&self) -> IndexResult<TreeInfo> {
        let build_file = artifact_path(&self.file_path, "build");
        let manifest = artifact_path(&self.file_path, "batches");

        let batches = if manifest.exists() {
            let batches = read_manifest(&manifest)?;
            info!(index = %self.description(), batches, "resuming build at merge phase");
            batches
        } else {
            if build_file.exists() {
                info!(index = %self.description(), "resuming build at grouping phase");
            } else {
                self.extract(&build_file)?;
            }
            self.group(&build_file, &manifest)?
        };

        let tree = self.merge(batches)?;

        for batch in 0..batches {
            remove_if_exists(&sort_path(&self.file_path, batch))?;
        }
        remove_if_exists(&manifest)?;
        remove_if_exists(&build_file)?;
        Ok(tree)
    }

    // ── phase 1 ───────────────────────────────────────────────────────────

    fn extract(&self, build_file: &Path) -> IndexResult<()> {
        let started = Instant::now();
        let temp = artifact_path(build_file, "tmp");
        let mut out = FileBackend::create(&temp)?;
        let mut stats = ExtractStats::default();
        let segments = self.descriptor.path.segments();
        let store = &self.context.store;

        let mut stack = vec![Frame {
            path: String::new(),
            next: 0,
            depth: 0,
        }];
        while let Some(frame) = stack.pop() {
            let mut path = frame.path;
            let mut next = frame.next;
            while let Some(key) = segments.get(next).and_then(PathSegment::record_key) {
                path = child_path(&path, &key);
                next += 1;
            }
            if next == segments.len() {
                self.extract_records(&path, frame.depth, &mut out, &mut stats)?;
                continue;
            }
            let children = store.children(&path)?;
            for child in children.iter().rev() {
                if child.exists && child.kind.is_container() {
                    stack.push(Frame {
                        path: child_path(&path, &child.key),
                        next: next + 1,
                        depth: frame.depth + 1,
                    });
                }
            }
        }

        out.sync()?;
        drop(out);
        rename_with_retry(
            &temp,
            build_file,
            self.context.config.rename_retries,
            self.context.config.rename_retry_delay,
        )?;
        info!(
            index = %self.description(),
            records = stats.records,
            entries = stats.entries,
            elapsed_ms = started.elapsed().as_millis(),
            "extraction done"
        );
        Ok(())
    }

    /// Extracts the records under `parent` in concurrent batches.
    fn extract_records(
        &self,
        parent: &str,
        depth: usize,
        out: &mut FileBackend,
        stats: &mut ExtractStats,
    ) -> IndexResult<()> {
        let children: Vec<ChildInfo> = self
            .context
            .store
            .children(parent)?
            .into_iter()
            .filter(|c| c.exists)
            .collect();
        if children.is_empty() {
            return Ok(());
        }
        let batch_size = self.context.config.batch_size_at_depth(depth);
        debug!(index = %self.description(), parent, records = children.len(), batch_size, "extracting");

        for batch in children.chunks(batch_size) {
            let per_worker = batch.len().div_ceil(worker_count());
            let parts: Vec<IndexResult<(Vec<u8>, usize)>> = thread::scope(|s| {
                let handles: Vec<_> = batch
                    .chunks(per_worker)
                    .map(|chunk| s.spawn(move || self.extract_chunk(parent, chunk)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join()
                            .unwrap_or_else(|_| Err(IndexError::internal("extraction worker panicked")))
                    })
                    .collect()
            });
            for part in parts {
                let (bytes, entries) = part?;
                if !bytes.is_empty() {
                    out.append(&bytes)?;
                }
                stats.entries += entries;
            }
            stats.records += batch.len();
        }
        Ok(())
    }

    fn extract_chunk(&self, parent: &str, chunk: &[ChildInfo]) -> IndexResult<(Vec<u8>, usize)> {
        let read_keys = self.descriptor.read_keys();
        let mut out = Vec::new();
        let mut entries = 0;
        for child in chunk {
            let path = child_path(parent, &child.key);
            let pointer = self.descriptor.path.match_record(&path).ok_or_else(|| {
                IndexError::internal(format!("walked path \"{path}\" does not match the index"))
            })?;
            let record = self.context.store.read_node(&path, Some(&read_keys))?;
            let encoded = pointer.encode()?;
            for (key, metadata) in self.record_entries(&pointer.key, record.as_ref(), &Metadata::new())? {
                let entry = TreeEntry::new(
                    key,
                    vec![EntryValue {
                        pointer: encoded.clone(),
                        metadata,
                    }],
                );
                let mut enc = Encoder::new();
                entry.encode(&mut enc)?;
                push_frame(&mut out, enc.as_bytes())?;
                entries += 1;
            }
        }
        Ok((out, entries))
    }

    // ── phase 2 ───────────────────────────────────────────────────────────

    fn group(&self, build_file: &Path, manifest: &Path) -> IndexResult<usize> {
        let started = Instant::now();
        let limit = self.context.config.max_values_in_memory.max(1);
        let mut reader = FrameReader::open(build_file)?;
        let mut groups: BTreeMap<IndexValue, TreeEntry> = BTreeMap::new();
        let mut values = 0;
        let mut batches = 0;

        while let Some(entry) = reader.next_entry()? {
            values += entry.values.len();
            match groups.get_mut(&entry.key) {
                Some(group) => {
                    for value in entry.values {
                        group.upsert(value);
                    }
                }
                None => {
                    groups.insert(entry.key.clone(), entry);
                }
            }
            if values >= limit {
                self.flush_batch(batches, &mut groups)?;
                batches += 1;
                values = 0;
            }
        }
        if !groups.is_empty() || batches == 0 {
            self.flush_batch(batches, &mut groups)?;
            batches += 1;
        }

        let temp = artifact_path(manifest, "tmp");
        fs::write(&temp, batches.to_string())?;
        rename_with_retry(
            &temp,
            manifest,
            self.context.config.rename_retries,
            self.context.config.rename_retry_delay,
        )?;
        info!(
            index = %self.description(),
            batches,
            elapsed_ms = started.elapsed().as_millis(),
            "grouping done"
        );
        Ok(batches)
    }

    fn flush_batch(&self, batch: usize, groups: &mut BTreeMap<IndexValue, TreeEntry>) -> IndexResult<()> {
        // Keys are grouped by the type-aware order, so values that compare
        // equal (`-0` and `0`) share one entry.
        let keys = groups.len();
        let mut bytes = Vec::new();
        for entry in std::mem::take(groups).into_values() {
            let mut enc = Encoder::new();
            entry.encode(&mut enc)?;
            push_frame(&mut bytes, enc.as_bytes())?;
        }
        let path = sort_path(&self.file_path, batch);
        let temp = artifact_path(&path, "tmp");
        let mut out = FileBackend::create(&temp)?;
        out.append(&bytes)?;
        out.sync()?;
        drop(out);
        rename_with_retry(
            &temp,
            &path,
            self.context.config.rename_retries,
            self.context.config.rename_retry_delay,
        )?;
        debug!(index = %self.description(), batch, keys, "batch written");
        Ok(())
    }

    // ── phase 3 ───────────────────────────────────────────────────────────

    fn merge(&self, batches: usize) -> IndexResult<TreeInfo> {
        let started = Instant::now();
        let config = &self.context.config;
        let mut readers = (0..batches)
            .map(|batch| FrameReader::open(&sort_path(&self.file_path, batch)))
            .collect::<IndexResult<Vec<_>>>()?;

        let temp = artifact_path(&self.file_path, "tmp");
        let tree = write_index_file(
            &temp,
            &self.descriptor,
            config.build_fill_factor,
            config.leaf_size,
            |builder| merge_into(&mut readers, builder),
        )?;
        rename_with_retry(&temp, &self.file_path, config.rename_retries, config.rename_retry_delay)?;
        info!(
            index = %self.description(),
            batches,
            entries = tree.entry_count,
            values = tree.value_count,
            elapsed_ms = started.elapsed().as_millis(),
            "merge done"
        );
        Ok(tree)
    }
}

/// Streams the union of sorted batches into `builder`, combining equal keys.
fn merge_into(readers: &mut [FrameReader], builder: &mut TreeBuilder<'_>) -> IndexResult<()> {
    let mut heads = readers
        .iter_mut()
        .map(FrameReader::next_entry)
        .collect::<IndexResult<Vec<_>>>()?;

    loop {
        let Some(smallest) = heads
            .iter()
            .flatten()
            .map(|e| &e.key)
            .min()
            .cloned()
        else {
            return Ok(());
        };

        let mut merged: Option<TreeEntry> = None;
        for (head, reader) in heads.iter_mut().zip(readers.iter_mut()) {
            if head.as_ref().is_some_and(|e| e.key == smallest) {
                let Some(entry) = std::mem::replace(head, reader.next_entry()?) else {
                    continue;
                };
                match merged.as_mut() {
                    Some(target) => {
                        for value in entry.values {
                            target.upsert(value);
                        }
                    }
                    None => merged = Some(entry),
                }
            }
        }
        if let Some(entry) = merged {
            builder.add(entry)?;
        }
    }
}

fn read_manifest(path: &Path) -> IndexResult<usize> {
    let text = fs::read_to_string(path)?;
    text.trim().parse().map_err(|_| {
        warn!(file = %path.display(), "unreadable batch manifest");
        IndexError::invalid_format(format!("batch manifest {} is malformed", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, IndexOptions};
    use crate::index::base::IndexContext;
    use crate::index::descriptor::IndexDescriptor;
    use crate::index::query::QueryOptions;
    use crate::store::MemoryStore;
    use arbordb_codec::Value;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_root(Value::from(json!({
            "users": {
                "ewout": {
                    "posts": {
                        "p1": { "title": "Hello", "stars": 3 },
                        "p2": { "title": "World", "stars": 5 }
                    }
                },
                "annet": {
                    "posts": {
                        "p3": { "title": "Hello again", "stars": 3 },
                        "p4": { "title": "Nothing" }
                    }
                },
                "pete": "not an object"
            }
        }))))
    }

    #[test]
    fn builds_across_wildcards_and_small_batches() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::default()
            .max_values_in_memory(1)
            .extraction_batch_size(1);
        let context = IndexContext::new(dir.path(), store(), config);
        let descriptor =
            IndexDescriptor::new("users/*/posts", "stars", IndexOptions::default()).unwrap();
        let index = DataIndex::new(context, descriptor).unwrap();
        index.build().unwrap();

        let results = index
            .query("==", &Value::from(3), &QueryOptions::default())
            .unwrap();
        let mut paths = results.paths();
        paths.sort_unstable();
        assert_eq!(paths, vec!["users/annet/posts/p3", "users/ewout/posts/p1"]);
        assert_eq!(index.count(">", &Value::from(0)).unwrap(), 3);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with("idx"))
            .collect();
        assert!(leftovers.is_empty(), "artifacts left behind: {leftovers:?}");
    }

    #[test]
    fn resumes_from_finished_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let context = IndexContext::new(dir.path(), store(), IndexConfig::default());
        let descriptor =
            IndexDescriptor::new("users/*/posts", "title", IndexOptions::default()).unwrap();
        let index = DataIndex::new(context, descriptor).unwrap();

        // A finished grouping phase with one batch holding a key the store
        // does not have.
        let mut bytes = Vec::new();
        let pointer = index
            .descriptor
            .path
            .match_record("users/ghost/posts/p9")
            .unwrap()
            .encode()
            .unwrap();
        let entry = TreeEntry::new(
            IndexValue::from("ghost"),
            vec![EntryValue {
                pointer,
                metadata: Metadata::new(),
            }],
        );
        let mut enc = Encoder::new();
        entry.encode(&mut enc).unwrap();
        push_frame(&mut bytes, enc.as_bytes()).unwrap();
        fs::write(sort_path(index.file_path(), 0), bytes).unwrap();
        fs::write(artifact_path(index.file_path(), "batches"), "1").unwrap();

        index.build().unwrap();
        let results = index
            .query("==", &Value::from("ghost"), &QueryOptions::default())
            .unwrap();
        assert_eq!(results.paths(), vec!["users/ghost/posts/p9"]);
        assert!(!artifact_path(index.file_path(), "batches").exists());
    }

    #[test]
    fn malformed_manifest_fails_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let context = IndexContext::new(dir.path(), store(), IndexConfig::default());
        let descriptor =
            IndexDescriptor::new("users/*/posts", "title", IndexOptions::default()).unwrap();
        let index = DataIndex::new(context, descriptor).unwrap();
        fs::write(artifact_path(index.file_path(), "batches"), "many").unwrap();

        assert!(index.build().is_err());
        assert_eq!(index.state(), crate::index::IndexState::Error);
        assert!(index.last_error().unwrap().contains("manifest"));
        assert!(index
            .query("==", &Value::from("hello"), &QueryOptions::default())
            .is_err());
    }

    #[test]
    fn frame_reader_rejects_torn_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn");
        fs::write(&path, [0, 0, 0, 9, 1, 2]).unwrap();
        let mut reader = FrameReader::open(&path).unwrap();
        assert!(reader.next_frame().is_err());
    }
}
