//! Per-index query result cache.

use super::results::IndexQueryResults;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct CacheEntry {
    results: IndexQueryResults,
    expires: Instant,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<(String, String), CacheEntry>,
    generation: u64,
}

/// Query results keyed by operator and canonical argument.
///
/// Entries expire after a fixed duration, checked lazily on lookup. With
/// sliding expiry every hit restarts the entry's lifetime. Any write to the
/// index clears the whole cache and starts a new generation; results
/// computed during an older generation are not stored.
#[derive(Debug)]
pub(crate) struct QueryCache {
    inner: Mutex<CacheInner>,
    duration: Duration,
    sliding: bool,
}

impl QueryCache {
    pub fn new(duration: Duration, sliding: bool) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            duration,
            sliding,
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn get(&self, op: &str, argument: &str) -> Option<IndexQueryResults> {
        let mut inner = self.inner.lock();
        let key = (op.to_string(), argument.to_string());
        let now = Instant::now();
        match inner.entries.get_mut(&key) {
            Some(entry) if entry.expires > now => {
                if self.sliding {
                    entry.expires = now + self.duration;
                }
                trace!(op, argument, "query cache hit");
                Some(entry.results.clone())
            }
            Some(_) => {
                inner.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, generation: u64, op: &str, argument: &str, results: &IndexQueryResults) {
        if self.duration.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.entries.retain(|_, entry| entry.expires > now);
        inner.entries.insert(
            (op.to_string(), argument.to_string()),
            CacheEntry {
                results: results.clone(),
                expires: now + self.duration,
            },
        );
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.generation += 1;
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
