//! Tokenization and word filtering for full-text indexes.

use super::fold::fold_diacritics;
use super::locale::lowercase;
use super::stoplist::is_stop_word;
use crate::config::FullTextConfig;
use crate::error::{IndexError, IndexResult};
use regex::Regex;
use std::collections::HashMap;

const WORD_PATTERN: &str = r"[\p{L}\p{N}_]+";
const QUERY_WORD_PATTERN: &str = r"[\p{L}\p{N}_*?]+";

/// A word that survived filtering, with every place it occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordInfo {
    /// The normalized word.
    pub word: String,
    /// Zero-based token positions, counting ignored tokens.
    pub indexes: Vec<usize>,
    /// Character offsets of each occurrence in the normalized text.
    pub offsets: Vec<usize>,
}

impl WordInfo {
    /// Returns true if the word contains `*` or `?` wildcards.
    pub fn is_wildcard(&self) -> bool {
        self.word.contains(['*', '?'])
    }
}

/// Result of analyzing a text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedText {
    words: Vec<WordInfo>,
    slots: HashMap<String, usize>,
    ignored: Vec<String>,
    token_count: usize,
}

impl AnalyzedText {
    /// Distinct words in order of first occurrence.
    pub fn words(&self) -> &[WordInfo] {
        &self.words
    }

    /// Looks up a word.
    pub fn get(&self, word: &str) -> Option<&WordInfo> {
        self.slots.get(word).map(|&slot| &self.words[slot])
    }

    /// Tokens that were dropped by a filter.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    /// Number of tokens found, including ignored ones.
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Returns true if no word survived filtering.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn record(&mut self, word: String, index: usize, offset: usize) {
        match self.slots.get(&word) {
            Some(&slot) => {
                let info = &mut self.words[slot];
                info.indexes.push(index);
                info.offsets.push(offset);
            }
            None => {
                self.slots.insert(word.clone(), self.words.len());
                self.words.push(WordInfo {
                    word,
                    indexes: vec![index],
                    offsets: vec![offset],
                });
            }
        }
    }
}

/// Splits text into filtered, normalized words.
#[derive(Debug, Clone)]
pub struct TextAnalyzer {
    config: FullTextConfig,
    pattern: Regex,
    query_pattern: Regex,
    blacklist: Vec<String>,
    whitelist: Vec<String>,
}

impl TextAnalyzer {
    /// Creates an analyzer.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidArgument`] if the custom pattern does not
    /// compile.
    pub fn new(config: FullTextConfig) -> IndexResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                IndexError::invalid_argument(format!("invalid tokenizer pattern: {e}"))
            })
        };
        let (pattern, query_pattern) = match &config.pattern {
            Some(custom) => (compile(custom)?, compile(custom)?),
            None => (compile(WORD_PATTERN)?, compile(QUERY_WORD_PATTERN)?),
        };
        let blacklist = config.blacklist.iter().map(|w| w.to_lowercase()).collect();
        let whitelist = config.whitelist.iter().map(|w| w.to_lowercase()).collect();
        Ok(Self {
            config,
            pattern,
            query_pattern,
            blacklist,
            whitelist,
        })
    }

    /// Returns the analyzer's configuration.
    pub fn config(&self) -> &FullTextConfig {
        &self.config
    }

    /// Analyzes indexed text.
    pub fn analyze(&self, text: &str, locale: &str) -> AnalyzedText {
        self.run(text, locale, false)
    }

    /// Analyzes query text, keeping `*` and `?` wildcards inside words.
    pub fn analyze_query(&self, text: &str, locale: &str) -> AnalyzedText {
        self.run(text, locale, true)
    }

    fn run(&self, text: &str, locale: &str, query: bool) -> AnalyzedText {
        let folded = fold_diacritics(text).replace(['\'', '\u{2019}'], "");
        let normalized = lowercase(&folded, locale);
        let pattern = if query { &self.query_pattern } else { &self.pattern };

        let mut result = AnalyzedText::default();
        let mut chars_before = 0;
        let mut last_byte = 0;
        for (index, token) in pattern.find_iter(&normalized).enumerate() {
            chars_before += normalized[last_byte..token.start()].chars().count();
            last_byte = token.start();
            result.token_count += 1;

            if let Some(word) = self.filter(token.as_str(), locale, query) {
                result.record(word, index, chars_before);
            } else {
                result.ignored.push(token.as_str().to_string());
            }
        }
        result
    }

    fn filter(&self, token: &str, locale: &str, query: bool) -> Option<String> {
        let wildcard = query && token.contains(['*', '?']);
        let word = match (&self.config.stemmer, wildcard) {
            (Some(stemmer), false) => stemmer.stem(token, locale)?,
            _ => token.to_string(),
        };
        if word.is_empty() {
            return None;
        }
        if !wildcard {
            let len = word.chars().count();
            if len < self.config.min_length || len > self.config.max_length {
                return None;
            }
        }
        if self.whitelist.contains(&word) {
            return Some(word);
        }
        if self.blacklist.contains(&word) {
            return None;
        }
        if self.config.use_stoplist && !wildcard && is_stop_word(&word, locale) {
            return None;
        }
        Some(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Stemmer;

    fn analyzer(config: FullTextConfig) -> TextAnalyzer {
        TextAnalyzer::new(config).unwrap()
    }

    #[test]
    fn positions_count_ignored_tokens() {
        let text = analyzer(FullTextConfig::default()).analyze("The quick brown fox", "en");
        let words: Vec<&str> = text.words().iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["quick", "brown", "fox"]);
        assert_eq!(text.get("quick").unwrap().indexes, vec![1]);
        assert_eq!(text.get("fox").unwrap().offsets, vec![16]);
        assert_eq!(text.ignored(), &["the".to_string()]);
        assert_eq!(text.token_count(), 4);
    }

    #[test]
    fn duplicates_accumulate_occurrences() {
        let config = FullTextConfig {
            use_stoplist: false,
            ..FullTextConfig::default()
        };
        let text = analyzer(config).analyze("to be or not to be", "en");
        assert_eq!(text.get("be").unwrap().indexes, vec![1, 5]);
        assert_eq!(text.get("to").unwrap().offsets, vec![0, 13]);
    }

    #[test]
    fn long_documents_keep_one_slot_per_word() {
        let text: String = (0..20_000).map(|i| format!("w{} ", i % 700)).collect();
        let analyzed = analyzer(FullTextConfig::default()).analyze(&text, "en");
        assert_eq!(analyzed.words().len(), 700);
        assert_eq!(analyzed.words()[3].word, "w3");
        let w3 = analyzed.get("w3").unwrap();
        assert_eq!(w3.indexes.len(), 29);
        assert_eq!(w3.indexes[..2], [3, 703]);
        assert!(analyzed.get("w700").is_none());
    }

    #[test]
    fn folds_accents_and_strips_apostrophes() {
        let text = analyzer(FullTextConfig::default()).analyze("Crème Brûlée isn't bad", "en");
        assert!(text.get("creme").is_some());
        assert!(text.get("brulee").is_some());
        assert!(text.get("isnt").is_some());
    }

    #[test]
    fn length_limits_and_lists() {
        let config = FullTextConfig {
            min_length: 3,
            max_length: 6,
            blacklist: vec!["Brown".into()],
            whitelist: vec!["the".into()],
            ..FullTextConfig::default()
        };
        let text = analyzer(config).analyze("the quick brown fox jumped", "en");
        let words: Vec<&str> = text.words().iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["the", "quick", "fox", "jumped"]);
    }

    #[test]
    fn query_mode_keeps_wildcards() {
        let analyzer = analyzer(FullTextConfig::default());
        let query = analyzer.analyze_query("qu* f?x", "en");
        assert!(query.words().iter().all(WordInfo::is_wildcard));
        let text = analyzer.analyze("qu* f?x", "en");
        assert_eq!(text.get("qu").unwrap().indexes, vec![0]);
    }

    #[test]
    fn stemmer_runs_before_filters() {
        let config = FullTextConfig {
            stemmer: Some(Stemmer::new(|word, _| {
                if word == "skip" {
                    None
                } else {
                    Some(word.trim_end_matches('s').to_string())
                }
            })),
            ..FullTextConfig::default()
        };
        let text = analyzer(config).analyze("foxes skip dogs", "en");
        let words: Vec<&str> = text.words().iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["foxe", "dog"]);
        assert_eq!(text.ignored(), &["skip".to_string()]);
    }

    #[test]
    fn invalid_custom_pattern() {
        let config = FullTextConfig {
            pattern: Some("[".into()),
            ..FullTextConfig::default()
        };
        assert!(matches!(
            TextAnalyzer::new(config),
            Err(IndexError::InvalidArgument { .. })
        ));
    }
}
