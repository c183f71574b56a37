//! Engine configuration and per-index options.

use crate::index::IndexKind;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Engine-wide configuration shared by every index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Maximum time to wait for, and to hold, an index lock.
    pub lock_timeout: Duration,

    /// How long query results stay cached.
    pub cache_duration: Duration,

    /// Whether a cache hit extends the entry's lifetime.
    pub cache_sliding: bool,

    /// Maximum number of entry values held in memory while grouping a build.
    pub max_values_in_memory: usize,

    /// Number of records read per batch at the top level of a build.
    ///
    /// The batch size is halved for every wildcard level below the root.
    pub extraction_batch_size: usize,

    /// Leaf fill percentage used when building an index from scratch.
    pub build_fill_factor: u8,

    /// Leaf fill percentage used when rebuilding after a leaf overflow.
    pub rebuild_fill_factor: u8,

    /// Minimum leaf capacity in bytes.
    pub leaf_size: u32,

    /// How many times a failed file rename is retried.
    pub rename_retries: u32,

    /// Delay between rename attempts.
    pub rename_retry_delay: Duration,

    /// Number of queued updates after which a warning is logged.
    pub max_pending_updates: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(120),
            cache_duration: Duration::from_secs(60),
            cache_sliding: true,
            max_values_in_memory: 100_000,
            extraction_batch_size: 1000,
            build_fill_factor: 95,
            rebuild_fill_factor: 50,
            leaf_size: 4096,
            rename_retries: 10,
            rename_retry_delay: Duration::from_millis(100),
            max_pending_updates: 10_000,
        }
    }
}

impl IndexConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the query cache lifetime.
    #[must_use]
    pub const fn cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = duration;
        self
    }

    /// Sets whether cache hits extend an entry's lifetime.
    #[must_use]
    pub const fn cache_sliding(mut self, value: bool) -> Self {
        self.cache_sliding = value;
        self
    }

    /// Sets the in-memory value limit for build grouping.
    #[must_use]
    pub const fn max_values_in_memory(mut self, max: usize) -> Self {
        self.max_values_in_memory = max;
        self
    }

    /// Sets the top-level extraction batch size.
    #[must_use]
    pub const fn extraction_batch_size(mut self, size: usize) -> Self {
        self.extraction_batch_size = size;
        self
    }

    /// Sets the minimum leaf capacity.
    #[must_use]
    pub const fn leaf_size(mut self, size: u32) -> Self {
        self.leaf_size = size;
        self
    }

    /// Sets the fill factors for builds and overflow rebuilds.
    #[must_use]
    pub const fn fill_factors(mut self, build: u8, rebuild: u8) -> Self {
        self.build_fill_factor = build;
        self.rebuild_fill_factor = rebuild;
        self
    }

    /// Batch size used for records `depth` wildcard levels below the root.
    #[must_use]
    pub fn batch_size_at_depth(&self, depth: usize) -> usize {
        let shift = u32::try_from(depth).unwrap_or(u32::MAX);
        self.extraction_batch_size
            .checked_shr(shift)
            .unwrap_or(0)
            .max(1)
    }
}

/// Optional word-stemming hook: `(word, locale)` to the stem, or `None` to
/// drop the word.
#[derive(Clone)]
pub struct Stemmer(Arc<dyn Fn(&str, &str) -> Option<String> + Send + Sync>);

impl Stemmer {
    /// Wraps a stemming function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Applies the hook.
    pub fn stem(&self, word: &str, locale: &str) -> Option<String> {
        (self.0)(word, locale)
    }
}

impl fmt::Debug for Stemmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stemmer(..)")
    }
}

/// Text analysis options of a full-text index.
#[derive(Debug, Clone)]
pub struct FullTextConfig {
    /// Words shorter than this many characters are ignored.
    pub min_length: usize,
    /// Words longer than this many characters are ignored.
    pub max_length: usize,
    /// Skip the locale's common words.
    pub use_stoplist: bool,
    /// Words that are never indexed.
    pub blacklist: Vec<String>,
    /// Words that are always indexed, even if stoplisted.
    pub whitelist: Vec<String>,
    /// Custom tokenizer pattern. Every match is one word.
    pub pattern: Option<String>,
    /// Minimum number of literal characters in a wildcard query word.
    pub min_wildcard_length: usize,
    /// Optional stemming hook, not persisted with the index.
    pub stemmer: Option<Stemmer>,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            min_length: 1,
            max_length: 25,
            use_stoplist: true,
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            pattern: None,
            min_wildcard_length: 2,
            stemmer: None,
        }
    }
}

/// Options for creating an index.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Index kind.
    pub kind: IndexKind,
    /// Compare string keys case-sensitively.
    pub case_sensitive: bool,
    /// Default locale for lowercasing and text analysis.
    pub locale: String,
    /// Record key holding a per-record locale override.
    pub locale_key: Option<String>,
    /// Record keys copied into each entry's metadata.
    pub include: Vec<String>,
    /// Text analysis options, used by full-text indexes.
    pub text: FullTextConfig,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            kind: IndexKind::Normal,
            case_sensitive: false,
            locale: "en".to_string(),
            locale_key: None,
            include: Vec::new(),
            text: FullTextConfig::default(),
        }
    }
}

impl IndexOptions {
    /// Options for an index of the given kind.
    #[must_use]
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Sets case sensitivity.
    #[must_use]
    pub fn case_sensitive(mut self, value: bool) -> Self {
        self.case_sensitive = value;
        self
    }

    /// Sets the default locale.
    #[must_use]
    pub fn locale(mut self, locale: &str) -> Self {
        self.locale = locale.to_string();
        self
    }

    /// Sets the per-record locale key.
    #[must_use]
    pub fn locale_key(mut self, key: &str) -> Self {
        self.locale_key = Some(key.to_string());
        self
    }

    /// Adds keys to copy into entry metadata.
    #[must_use]
    pub fn include<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Sets text analysis options.
    #[must_use]
    pub fn text(mut self, text: FullTextConfig) -> Self {
        self.text = text;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = IndexConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(120));
        assert_eq!(config.build_fill_factor, 95);
        assert_eq!(config.rebuild_fill_factor, 50);
        assert!(config.cache_sliding);
    }

    #[test]
    fn builder_pattern() {
        let config = IndexConfig::new()
            .lock_timeout(Duration::from_secs(5))
            .leaf_size(512)
            .fill_factors(80, 40)
            .cache_sliding(false);

        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.leaf_size, 512);
        assert_eq!(config.build_fill_factor, 80);
        assert_eq!(config.rebuild_fill_factor, 40);
        assert!(!config.cache_sliding);
    }

    #[test]
    fn batch_size_halves_per_depth() {
        let config = IndexConfig::new().extraction_batch_size(1000);
        assert_eq!(config.batch_size_at_depth(0), 1000);
        assert_eq!(config.batch_size_at_depth(1), 500);
        assert_eq!(config.batch_size_at_depth(3), 125);
        assert_eq!(config.batch_size_at_depth(20), 1);
        assert_eq!(config.batch_size_at_depth(200), 1);
    }

    #[test]
    fn stemmer_hook() {
        let stemmer = Stemmer::new(|word, _| word.strip_suffix("ing").map(str::to_string));
        assert_eq!(stemmer.stem("running", "en"), Some("runn".to_string()));
        assert_eq!(stemmer.stem("run", "en"), None);
    }
}
