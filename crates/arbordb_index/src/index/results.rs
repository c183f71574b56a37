//! Query results.

use arbordb_codec::{IndexValue, Metadata, RecordKey};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// One matching record.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQueryResult {
    /// The record's own key.
    pub key: RecordKey,
    /// Absolute path of the record.
    pub path: String,
    /// The indexed value that matched.
    pub value: IndexValue,
    /// Metadata stored with the entry.
    pub metadata: Metadata,
    pointer: Vec<u8>,
}

impl IndexQueryResult {
    pub(crate) fn new(
        key: RecordKey,
        path: String,
        value: IndexValue,
        metadata: Metadata,
        pointer: Vec<u8>,
    ) -> Self {
        Self {
            key,
            path,
            value,
            metadata,
            pointer,
        }
    }

    /// Encoded record pointer of the result.
    pub fn pointer(&self) -> &[u8] {
        &self.pointer
    }
}

/// Advisory information about how a query was evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQueryHint {
    /// A query word does not occur in the index.
    WordNotFound {
        /// The word.
        word: String,
    },
    /// A query word was removed by text analysis (stoplist, length limits).
    WordIgnored {
        /// The word.
        word: String,
    },
    /// A wildcard word had too few literal characters and was dropped.
    WildcardIgnored {
        /// The word.
        word: String,
    },
}

/// Execution statistics of a query and its sub-queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexQueryStats {
    /// Operator.
    pub operation: String,
    /// Canonical argument.
    pub argument: String,
    /// Wall-clock time.
    pub duration: Duration,
    /// Number of results.
    pub result_count: usize,
    /// Number of tree searches issued, sub-queries included.
    pub queries: usize,
    /// Sub-query statistics.
    pub steps: Vec<IndexQueryStats>,
}

impl IndexQueryStats {
    pub(crate) fn new(operation: &str, argument: String) -> Self {
        Self {
            operation: operation.to_string(),
            argument,
            ..Self::default()
        }
    }

    pub(crate) fn finish(&mut self, started: Instant, result_count: usize) {
        self.duration = started.elapsed();
        self.result_count = result_count;
        if !self.steps.is_empty() {
            self.queries = self.steps.iter().map(|s| s.queries).sum();
        }
    }
}

/// Results of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexQueryResults {
    /// Matching records, in index order.
    pub results: Vec<IndexQueryResult>,
    /// Advisory hints.
    pub hints: Vec<IndexQueryHint>,
    /// Execution statistics.
    pub stats: IndexQueryStats,
}

impl IndexQueryResults {
    pub(crate) fn new(results: Vec<IndexQueryResult>, stats: IndexQueryStats) -> Self {
        Self {
            results,
            hints: Vec::new(),
            stats,
        }
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if nothing matched.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterates the results.
    pub fn iter(&self) -> std::slice::Iter<'_, IndexQueryResult> {
        self.results.iter()
    }

    /// Record paths, in result order.
    pub fn paths(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.path.as_str()).collect()
    }

    /// Record keys, in result order.
    pub fn keys(&self) -> Vec<&RecordKey> {
        self.results.iter().map(|r| &r.key).collect()
    }

    /// Keeps the results whose metadata value for `key` satisfies `keep`.
    #[must_use]
    pub fn filter_metadata<F>(mut self, key: &str, keep: F) -> Self
    where
        F: Fn(Option<&IndexValue>) -> bool,
    {
        self.results.retain(|r| keep(r.metadata.get(key)));
        self
    }

    /// Adds the results of `other` for records not already present.
    pub(crate) fn union(&mut self, other: IndexQueryResults) {
        let mut seen: HashSet<Vec<u8>> = self.results.iter().map(|r| r.pointer.clone()).collect();
        for result in other.results {
            if seen.insert(result.pointer.clone()) {
                self.results.push(result);
            }
        }
        for hint in other.hints {
            if !self.hints.contains(&hint) {
                self.hints.push(hint);
            }
        }
        self.stats.steps.push(other.stats);
    }
}

impl<'a> IntoIterator for &'a IndexQueryResults {
    type Item = &'a IndexQueryResult;
    type IntoIter = std::slice::Iter<'a, IndexQueryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, value: f64) -> IndexQueryResult {
        let mut metadata = Metadata::new();
        metadata.insert("n".into(), IndexValue::from(value));
        IndexQueryResult::new(
            RecordKey::from(name),
            format!("users/{name}"),
            IndexValue::from(value),
            metadata,
            name.as_bytes().to_vec(),
        )
    }

    #[test]
    fn union_skips_known_records() {
        let mut a = IndexQueryResults::new(vec![result("a", 1.0)], IndexQueryStats::default());
        let b = IndexQueryResults::new(
            vec![result("a", 2.0), result("b", 3.0)],
            IndexQueryStats::default(),
        );
        a.union(b);
        assert_eq!(a.paths(), vec!["users/a", "users/b"]);
        assert_eq!(a.results[0].value, IndexValue::from(1.0));
        assert_eq!(a.stats.steps.len(), 1);
    }

    #[test]
    fn filter_on_metadata() {
        let results = IndexQueryResults::new(
            vec![result("a", 1.0), result("b", 5.0)],
            IndexQueryStats::default(),
        );
        let filtered =
            results.filter_metadata("n", |v| v.and_then(IndexValue::as_f64).is_some_and(|n| n > 2.0));
        assert_eq!(filtered.keys(), vec![&RecordKey::from("b")]);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn stats_count_sub_queries() {
        let mut stats = IndexQueryStats::new("contains", "[\"a\",\"b\"]".into());
        stats.steps.push(IndexQueryStats {
            queries: 1,
            ..IndexQueryStats::default()
        });
        stats.steps.push(IndexQueryStats {
            queries: 1,
            ..IndexQueryStats::default()
        });
        stats.finish(Instant::now(), 4);
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.result_count, 4);
    }
}
