//! Full-text indexes.
//!
//! Every distinct word of a text is stored as a key. The word's token
//! positions are kept in the `_occurs_` metadata value as a comma-joined
//! list, which is what phrase queries are checked against.
//!
//! Query grammar for `fulltext:contains`:
//!
//! ```text
//! query  = part (" OR " part)*          union of the parts
//! part   = (word | "\"" phrase "\"")*   every word and phrase must match
//! ```
//!
//! Words may use `*` and `?` wildcards when they have at least
//! `min_wildcard_length` literal characters.

use super::base::DataIndex;
use super::descriptor::{IndexDescriptor, IndexKind};
use super::query::{has_wildcards, QueryOperator, QueryOptions};
use super::results::{IndexQueryHint, IndexQueryResults, IndexQueryStats};
use super::variant::{count_probes, narrow_counted, IndexVariant, Probe};
use crate::config::FullTextConfig;
use crate::error::{IndexError, IndexResult};
use crate::text::{AnalyzedText, TextAnalyzer, WordInfo};
use crate::tree::{like_regex, TreeQuery};
use arbordb_codec::{truncate_utf8, IndexValue, Metadata, Value, MAX_STRING_LENGTH};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::warn;

/// Metadata key holding a word's token positions.
pub const OCCURS_KEY: &str = "_occurs_";

const OPERATORS: &[QueryOperator] = &[
    QueryOperator::FullTextContains,
    QueryOperator::FullTextNotContains,
];

/// A phrase as `(position, word)` pairs in position order.
type Phrase = Vec<(usize, String)>;

/// One `OR`-separated part of a query, after analysis.
#[derive(Debug, Default)]
struct QueryPart {
    phrases: Vec<Phrase>,
    words: Vec<String>,
    hints: Vec<IndexQueryHint>,
}

impl QueryPart {
    fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.words.is_empty()
    }

    fn hint(&mut self, hint: IndexQueryHint) {
        if !self.hints.contains(&hint) {
            self.hints.push(hint);
        }
    }

    /// Every word of the part, phrase words included.
    fn all_words(&self) -> BTreeSet<&str> {
        self.phrases
            .iter()
            .flatten()
            .map(|(_, w)| w.as_str())
            .chain(self.words.iter().map(String::as_str))
            .collect()
    }
}

fn parse_occurrences(metadata: &Metadata) -> Vec<usize> {
    metadata
        .get(OCCURS_KEY)
        .and_then(IndexValue::as_str)
        .map(|s| s.split(',').filter_map(|n| n.parse().ok()).collect())
        .unwrap_or_default()
}

/// Returns true if the phrase occurs at consecutive positions, with the
/// same gaps as in the query.
fn phrase_occurs<'a, F>(phrase: &[(usize, String)], occurrences: F) -> bool
where
    F: Fn(&str) -> Option<&'a [usize]>,
{
    let Some(((first_position, first), rest)) = phrase.split_first() else {
        return false;
    };
    let Some(starts) = occurrences(first) else {
        return false;
    };
    starts.iter().any(|start| {
        rest.iter().all(|(position, word)| {
            let expected = start + (position - first_position);
            occurrences(word).is_some_and(|o| o.contains(&expected))
        })
    })
}

fn word_probe(word: &str) -> IndexResult<Probe> {
    let query = if has_wildcards(word) {
        TreeQuery::Like(
            like_regex(word)
                .map_err(|e| IndexError::invalid_argument(format!("invalid pattern: {e}")))?,
        )
    } else {
        TreeQuery::Equal(IndexValue::from(word))
    };
    Ok(Probe {
        op: if has_wildcards(word) { "like" } else { "==" },
        argument: word.to_string(),
        query,
    })
}

fn empty_results(stats: IndexQueryStats, hints: Vec<IndexQueryHint>) -> IndexQueryResults {
    let mut results = IndexQueryResults::new(Vec::new(), stats);
    results.hints = hints;
    results
}

/// Indexes the words of text values.
#[derive(Debug, Clone)]
pub struct FullTextIndex {
    analyzer: TextAnalyzer,
}

impl FullTextIndex {
    /// Creates the variant.
    ///
    /// # Errors
    ///
    /// Fails if the tokenizer pattern does not compile.
    pub fn new(config: FullTextConfig) -> IndexResult<Self> {
        Ok(Self {
            analyzer: TextAnalyzer::new(config)?,
        })
    }

    /// Splits query text into quoted phrases and free words.
    fn parse_part(&self, text: &str, locale: &str) -> QueryPart {
        let mut part = QueryPart::default();
        let mut free_text = String::new();
        for (i, segment) in text.split('"').enumerate() {
            if i % 2 == 0 {
                free_text.push_str(segment);
                free_text.push(' ');
                continue;
            }
            let analyzed = self.analyzer.analyze_query(segment, locale);
            let mut phrase: Phrase = Vec::new();
            for info in self.usable_words(&analyzed, &mut part) {
                if info.is_wildcard() {
                    part.hint(IndexQueryHint::WildcardIgnored {
                        word: info.word.clone(),
                    });
                    continue;
                }
                phrase.extend(info.indexes.iter().map(|&p| (p, info.word.clone())));
            }
            phrase.sort_unstable();
            match phrase.len() {
                0 => {}
                1 => part.words.extend(phrase.into_iter().map(|(_, w)| w)),
                _ => part.phrases.push(phrase),
            }
        }

        let analyzed = self.analyzer.analyze_query(&free_text, locale);
        let words: Vec<String> = self
            .usable_words(&analyzed, &mut part)
            .into_iter()
            .map(|info| info.word.clone())
            .collect();
        for word in words {
            if !part.words.contains(&word) {
                part.words.push(word);
            }
        }
        part
    }

    /// The analyzed query words that can be searched for, recording hints
    /// for the ones that cannot.
    fn usable_words<'t>(
        &self,
        analyzed: &'t AnalyzedText,
        part: &mut QueryPart,
    ) -> Vec<&'t WordInfo> {
        for word in analyzed.ignored() {
            part.hint(IndexQueryHint::WordIgnored { word: word.clone() });
        }
        let min_literal = self.analyzer.config().min_wildcard_length;
        let mut usable = Vec::new();
        for info in analyzed.words() {
            if info.is_wildcard() {
                let literal = info.word.chars().filter(|c| !matches!(c, '*' | '?')).count();
                if literal == 0 || literal < min_literal {
                    part.hint(IndexQueryHint::WildcardIgnored {
                        word: info.word.clone(),
                    });
                    continue;
                }
            }
            usable.push(info);
        }
        usable
    }

    fn contains(
        &self,
        index: &DataIndex,
        text: &str,
        options: &QueryOptions<'_>,
        stats: IndexQueryStats,
    ) -> IndexResult<IndexQueryResults> {
        let parts: Vec<&str> = text
            .split(" OR ")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 2 {
            return self.contains_all(index, text, options, stats);
        }

        let started = Instant::now();
        let mut combined = IndexQueryResults::new(Vec::new(), stats);
        for part in parts {
            let stats = IndexQueryStats::new(QueryOperator::FullTextContains.as_str(), part.to_string());
            combined.union(self.contains_all(index, part, options, stats)?);
        }
        let count = combined.len();
        combined.stats.finish(started, count);
        Ok(combined)
    }

    /// Records containing every word and phrase of one query part.
    fn contains_all(
        &self,
        index: &DataIndex,
        text: &str,
        options: &QueryOptions<'_>,
        mut stats: IndexQueryStats,
    ) -> IndexResult<IndexQueryResults> {
        let started = Instant::now();
        let mut part = self.parse_part(text, &index.descriptor.locale);
        if part.is_empty() {
            stats.finish(started, 0);
            return Ok(empty_results(stats, part.hints));
        }

        let mut current: Option<IndexQueryResults> = None;
        for phrase in &part.phrases {
            let filter = current.as_ref().or(options.filter);
            let found = self.match_phrase(index, phrase, filter, &mut part.hints)?;
            stats.steps.push(found.stats.clone());
            let exhausted = found.is_empty();
            current = Some(found);
            if exhausted {
                stats.finish(started, 0);
                return Ok(empty_results(stats, part.hints));
            }
        }

        if !part.words.is_empty() {
            let probes = part
                .words
                .iter()
                .map(|w| word_probe(w))
                .collect::<IndexResult<Vec<_>>>()?;
            let counted = count_probes(index, probes)?;
            let mut missing = false;
            for (count, probe) in &counted {
                if *count == 0 {
                    missing = true;
                    part.hint(IndexQueryHint::WordNotFound {
                        word: probe.argument.clone(),
                    });
                }
            }
            if missing {
                stats.finish(started, 0);
                return Ok(empty_results(stats, part.hints));
            }
            let filter = QueryOptions {
                filter: current.as_ref().or(options.filter),
            };
            let words_stats = IndexQueryStats::new("words", part.words.join(" "));
            let found = narrow_counted(index, counted, &filter, words_stats)?;
            stats.steps.push(found.stats.clone());
            current = Some(found);
        }

        let results = current.map(|r| r.results).unwrap_or_default();
        stats.finish(started, results.len());
        let mut results = IndexQueryResults::new(results, stats);
        results.hints = part.hints;
        Ok(results)
    }

    /// Records in which the phrase's words occur consecutively.
    fn match_phrase(
        &self,
        index: &DataIndex,
        phrase: &[(usize, String)],
        filter: Option<&IndexQueryResults>,
        hints: &mut Vec<IndexQueryHint>,
    ) -> IndexResult<IndexQueryResults> {
        let started = Instant::now();
        let text: Vec<&str> = phrase.iter().map(|(_, w)| w.as_str()).collect();
        let mut stats = IndexQueryStats::new("phrase", text.join(" "));

        let distinct: BTreeSet<&str> = text.iter().copied().collect();
        let mut counted = Vec::with_capacity(distinct.len());
        for word in distinct {
            let query = TreeQuery::Equal(IndexValue::from(word));
            counted.push((index.count_query(&query)?, word, query));
        }
        let missing: Vec<&str> = counted
            .iter()
            .filter(|(count, ..)| *count == 0)
            .map(|(_, word, _)| *word)
            .collect();
        if !missing.is_empty() {
            for word in missing {
                let hint = IndexQueryHint::WordNotFound {
                    word: word.to_string(),
                };
                if !hints.contains(&hint) {
                    hints.push(hint);
                }
            }
            stats.finish(started, 0);
            return Ok(IndexQueryResults::new(Vec::new(), stats));
        }
        counted.sort_by_key(|(count, ..)| *count);

        let mut occurrences: HashMap<&str, HashMap<Vec<u8>, Vec<usize>>> = HashMap::new();
        let mut current: Option<IndexQueryResults> = None;
        for (_, word, query) in counted {
            let step = {
                let options = QueryOptions {
                    filter: current.as_ref().or(filter),
                };
                index.search(&query, &options, IndexQueryStats::new("==", word.to_string()))?
            };
            occurrences.insert(
                word,
                step.iter()
                    .map(|r| (r.pointer().to_vec(), parse_occurrences(&r.metadata)))
                    .collect(),
            );
            stats.steps.push(step.stats.clone());
            let exhausted = step.is_empty();
            current = Some(step);
            if exhausted {
                break;
            }
        }

        let mut results = current.map(|r| r.results).unwrap_or_default();
        results.retain(|r| {
            phrase_occurs(phrase, |word| {
                occurrences
                    .get(word)
                    .and_then(|by_record| by_record.get(r.pointer()))
                    .map(Vec::as_slice)
            })
        });
        stats.finish(started, results.len());
        Ok(IndexQueryResults::new(results, stats))
    }

    fn not_contains(
        &self,
        index: &DataIndex,
        text: &str,
        options: &QueryOptions<'_>,
        stats: IndexQueryStats,
    ) -> IndexResult<IndexQueryResults> {
        let part = self.parse_part(&text.replace(" OR ", " "), &index.descriptor.locale);
        let probes = part
            .all_words()
            .into_iter()
            .map(word_probe)
            .collect::<IndexResult<Vec<_>>>()?;
        let mut results =
            index.scan_excluding(|key, _| probes.iter().any(|p| p.query.matches(key)), options, stats)?;
        results.hints = part.hints;
        Ok(results)
    }

    fn text_contains(&self, analyzed: &AnalyzedText, part: &QueryPart) -> bool {
        let occurrences = |word: &str| analyzed.get(word).map(|w| w.indexes.as_slice());
        let has_word = |word: &String| match word_probe(word) {
            Ok(probe) if has_wildcards(word) => analyzed
                .words()
                .iter()
                .any(|w| probe.query.matches(&IndexValue::from(w.word.as_str()))),
            Ok(_) => analyzed.get(word).is_some(),
            Err(_) => false,
        };
        !part.is_empty()
            && part.phrases.iter().all(|p| phrase_occurs(p, occurrences))
            && part.words.iter().all(has_word)
    }
}

impl IndexVariant for FullTextIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::FullText
    }

    fn valid_operators(&self) -> &'static [QueryOperator] {
        OPERATORS
    }

    fn extract(
        &self,
        descriptor: &IndexDescriptor,
        value: &Value,
        locale: &str,
    ) -> IndexResult<Vec<(IndexValue, Metadata)>> {
        let Some(text) = value.as_str() else {
            return Ok(Vec::new());
        };
        let analyzed = self.analyzer.analyze(text, locale);
        let mut entries = Vec::with_capacity(analyzed.words().len());
        for info in analyzed.words() {
            let joined = info
                .indexes
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let occurs = match truncate_utf8(&joined, MAX_STRING_LENGTH) {
                Some(short) => {
                    let cut = short.rfind(',').map_or(short, |end| &short[..end]);
                    warn!(
                        index = %descriptor.description(),
                        word = %info.word,
                        occurrences = info.indexes.len(),
                        "occurrence list truncated"
                    );
                    cut.to_string()
                }
                None => joined,
            };
            let mut metadata = Metadata::new();
            metadata.insert(OCCURS_KEY.to_string(), IndexValue::String(occurs));
            entries.push((IndexValue::from(info.word.as_str()), metadata));
        }
        Ok(entries)
    }

    fn query(
        &self,
        index: &DataIndex,
        op: QueryOperator,
        arg: &Value,
        options: &QueryOptions<'_>,
    ) -> IndexResult<IndexQueryResults> {
        let text = arg.as_str().ok_or_else(|| {
            IndexError::invalid_argument(format!(
                "operator \"{op}\" needs a string, got {}",
                arg.type_name()
            ))
        })?;
        let stats = IndexQueryStats::new(op.as_str(), text.to_string());
        match op {
            QueryOperator::FullTextContains => self.contains(index, text, options, stats),
            QueryOperator::FullTextNotContains => self.not_contains(index, text, options, stats),
            other => Err(IndexError::UnsupportedOperator {
                operator: other.as_str().to_string(),
                kind: IndexKind::FullText.as_str(),
            }),
        }
    }

    fn test(
        &self,
        index: &DataIndex,
        value: &Value,
        op: QueryOperator,
        arg: &Value,
    ) -> IndexResult<bool> {
        let query = arg.as_str().ok_or_else(|| {
            IndexError::invalid_argument(format!(
                "operator \"{op}\" needs a string, got {}",
                arg.type_name()
            ))
        })?;
        let locale = &index.descriptor.locale;
        let analyzed = self
            .analyzer
            .analyze(value.as_str().unwrap_or_default(), locale);
        match op {
            QueryOperator::FullTextContains => Ok(query
                .split(" OR ")
                .map(|part| self.parse_part(part, locale))
                .any(|part| self.text_contains(&analyzed, &part))),
            QueryOperator::FullTextNotContains => {
                let part = self.parse_part(&query.replace(" OR ", " "), locale);
                let found = part.all_words().into_iter().any(|word| {
                    let words = QueryPart {
                        words: vec![word.to_string()],
                        ..QueryPart::default()
                    };
                    self.text_contains(&analyzed, &words)
                });
                Ok(!found)
            }
            other => Err(IndexError::UnsupportedOperator {
                operator: other.as_str().to_string(),
                kind: IndexKind::FullText.as_str(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, IndexOptions};
    use crate::index::base::IndexContext;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn built() -> (tempfile::TempDir, DataIndex) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_root(Value::from(json!({
            "chats": {
                "a": { "text": "The quick brown fox jumps over the lazy dog" },
                "b": { "text": "A brown dog, quick as a fox" },
                "c": { "text": "Slow turtles are never quick" },
                "d": { "text": "Café au lait for everyone" }
            }
        }))));
        let context = IndexContext::new(dir.path(), store, IndexConfig::default());
        let descriptor =
            IndexDescriptor::new("chats", "text", IndexOptions::new(IndexKind::FullText)).unwrap();
        let index = DataIndex::new(context, descriptor).unwrap();
        index.build().unwrap();
        (dir, index)
    }

    fn query(index: &DataIndex, op: &str, text: &str) -> (Vec<String>, Vec<IndexQueryHint>) {
        let results = index
            .query(op, &Value::from(text), &QueryOptions::default())
            .unwrap();
        let mut keys: Vec<String> = results.keys().iter().map(|k| k.to_string()).collect();
        keys.sort();
        (keys, results.hints)
    }

    #[test]
    fn every_word_must_occur() {
        let (_dir, index) = built();
        assert_eq!(query(&index, "fulltext:contains", "quick fox").0, vec!["a", "b"]);
        assert_eq!(query(&index, "fulltext:contains", "quick").0, vec!["a", "b", "c"]);
        assert_eq!(query(&index, "fulltext:contains", "cafe").0, vec!["d"]);
    }

    #[test]
    fn phrases_respect_word_order() {
        let (_dir, index) = built();
        assert_eq!(query(&index, "fulltext:contains", "\"quick brown\"").0, vec!["a"]);
        assert!(query(&index, "fulltext:contains", "\"brown quick\"").0.is_empty());
        assert_eq!(query(&index, "fulltext:contains", "\"brown dog\" fox").0, vec!["b"]);
        assert_eq!(query(&index, "fulltext:contains", "\"jumps over the lazy\"").0, vec!["a"]);
        assert!(query(&index, "fulltext:contains", "\"jumps lazy\"").0.is_empty());
    }

    #[test]
    fn or_unions_parts() {
        let (_dir, index) = built();
        assert_eq!(
            query(&index, "fulltext:contains", "turtles OR lait").0,
            vec!["c", "d"]
        );
    }

    #[test]
    fn missing_and_ignored_words_become_hints() {
        let (_dir, index) = built();
        let (keys, hints) = query(&index, "fulltext:contains", "the zebra");
        assert!(keys.is_empty());
        assert!(hints.contains(&IndexQueryHint::WordIgnored { word: "the".into() }));
        assert!(hints.contains(&IndexQueryHint::WordNotFound { word: "zebra".into() }));
    }

    #[test]
    fn short_wildcards_are_dropped() {
        let (_dir, index) = built();
        let (keys, hints) = query(&index, "fulltext:contains", "q* turt*");
        assert_eq!(keys, vec!["c"]);
        assert!(hints.contains(&IndexQueryHint::WildcardIgnored { word: "q*".into() }));
    }

    #[test]
    fn not_contains_excludes_records() {
        let (_dir, index) = built();
        assert_eq!(query(&index, "fulltext:!contains", "fox").0, vec!["c", "d"]);
        assert_eq!(query(&index, "fulltext:!contains", "fox OR turt*").0, vec!["d"]);
    }

    #[test]
    fn occurrences_are_stored_as_metadata() {
        let descriptor =
            IndexDescriptor::new("chats", "text", IndexOptions::new(IndexKind::FullText)).unwrap();
        let variant = FullTextIndex::new(FullTextConfig::default()).unwrap();
        let entries = variant
            .extract(&descriptor, &Value::from("dog eat dog"), "en")
            .unwrap();
        let dog = entries
            .iter()
            .find(|(k, _)| k.as_str() == Some("dog"))
            .unwrap();
        assert_eq!(parse_occurrences(&dog.1), vec![0, 2]);
    }

    #[test]
    fn long_occurrence_lists_are_cut_at_a_separator() {
        let descriptor =
            IndexDescriptor::new("chats", "text", IndexOptions::new(IndexKind::FullText)).unwrap();
        let variant = FullTextIndex::new(FullTextConfig::default()).unwrap();
        let text = vec!["word"; 200].join(" ");
        let entries = variant.extract(&descriptor, &Value::from(text), "en").unwrap();
        let occurs = entries[0].1.get(OCCURS_KEY).and_then(IndexValue::as_str).unwrap();
        assert!(occurs.len() <= MAX_STRING_LENGTH);
        assert!(!occurs.ends_with(','));
        assert_eq!(parse_occurrences(&entries[0].1)[..3], [0, 1, 2]);
    }

    #[test]
    fn test_predicate_follows_the_query_grammar() {
        let (_dir, index) = built();
        let text = Value::from("The quick brown fox");
        let test = |op: &str, q: &str| index.test(&text, op, &Value::from(q)).unwrap();
        assert!(test("fulltext:contains", "\"quick brown\""));
        assert!(!test("fulltext:contains", "\"brown quick\""));
        assert!(test("fulltext:contains", "zebra OR fox"));
        assert!(test("fulltext:contains", "bro*"));
        assert!(test("fulltext:!contains", "zebra"));
        assert!(!test("fulltext:!contains", "zebra OR fox"));
        assert!(!test("fulltext:!contains", "\"quick brown\" zebra"));
        assert!(test("fulltext:!contains", "cat* dog"));
    }

    #[test]
    fn phrase_matching_uses_relative_positions() {
        let phrase: Phrase = vec![(3, "brown".into()), (4, "fox".into())];
        let occurs: HashMap<&str, Vec<usize>> =
            [("brown", vec![2, 7]), ("fox", vec![8])].into_iter().collect();
        assert!(phrase_occurs(&phrase, |w| occurs.get(w).map(Vec::as_slice)));
        let occurs: HashMap<&str, Vec<usize>> =
            [("brown", vec![2]), ("fox", vec![4])].into_iter().collect();
        assert!(!phrase_occurs(&phrase, |w| occurs.get(w).map(Vec::as_slice)));
    }
}
