//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use arbordb_index::{
    IndexConfig, IndexQueryResults, IndexRegistry, MemoryStore, QueryOptions, Value,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Routes engine logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A registry in a fresh directory over an in-memory store.
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub registry: IndexRegistry,
}

impl Fixture {
    pub fn new(root: serde_json::Value) -> Self {
        Self::with_root(Value::from(root), IndexConfig::default())
    }

    pub fn with_root(root: Value, config: IndexConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_root(root));
        let registry = IndexRegistry::open(dir.path().join("indexes"), store.clone(), config)
            .unwrap();
        Self {
            dir,
            store,
            registry,
        }
    }

    /// Writes a record and forwards the change to the indexes.
    pub fn put(&self, path: &str, value: serde_json::Value) {
        let value = Value::from(value);
        let old = self.store.set(path, value.clone()).unwrap();
        self.registry
            .handle_record_update(path, old.as_ref(), Some(&value))
            .unwrap();
    }
}

/// Sorted record keys of a result set.
pub fn keys(results: &IndexQueryResults) -> Vec<String> {
    let mut keys: Vec<String> = results.keys().iter().map(|k| k.to_string()).collect();
    keys.sort();
    keys
}

pub fn no_filter() -> QueryOptions<'static> {
    QueryOptions::default()
}
