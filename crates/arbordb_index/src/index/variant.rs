//! Behaviour that differs between index kinds.

use super::array::ArrayIndex;
use super::base::DataIndex;
use super::descriptor::{IndexDescriptor, IndexKind};
use super::fulltext::FullTextIndex;
use super::geo::GeoIndex;
use super::normal::NormalIndex;
use super::query::{QueryOperator, QueryOptions};
use super::results::{IndexQueryResults, IndexQueryStats};
use crate::error::IndexResult;
use crate::tree::{EntryValue, TreeOp, TreeQuery};
use arbordb_codec::{IndexValue, Metadata, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// The tree entries a single record contributes: key to metadata.
pub type EntrySet = BTreeMap<IndexValue, Metadata>;

/// One index kind.
///
/// The base index owns storage, locking, caching and the update protocol;
/// a variant decides which keys a record produces and how its operators
/// are evaluated.
pub trait IndexVariant: Send + Sync + fmt::Debug {
    /// Kind of index.
    fn kind(&self) -> IndexKind;

    /// Operators accepted by [`IndexVariant::query`].
    fn valid_operators(&self) -> &'static [QueryOperator];

    /// Extracts the keys of a record's indexed value, with any metadata
    /// the variant stores per key.
    ///
    /// `value` is the raw indexed value, `Value::Null` if the record has
    /// none. Keys are normalized and truncated by the caller.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be indexed.
    fn extract(
        &self,
        descriptor: &IndexDescriptor,
        value: &Value,
        locale: &str,
    ) -> IndexResult<Vec<(IndexValue, Metadata)>>;

    /// Tree operations that turn `old` into `new` for one record.
    ///
    /// Keys whose metadata changed are removed and added again.
    fn delta(&self, old: &EntrySet, new: &EntrySet, pointer: &[u8]) -> Vec<TreeOp> {
        let mut ops = Vec::new();
        for (key, metadata) in old {
            if new.get(key) != Some(metadata) {
                ops.push(TreeOp::Remove {
                    key: key.clone(),
                    pointer: pointer.to_vec(),
                });
            }
        }
        for (key, metadata) in new {
            if old.get(key) != Some(metadata) {
                ops.push(TreeOp::Add {
                    key: key.clone(),
                    value: EntryValue {
                        pointer: pointer.to_vec(),
                        metadata: metadata.clone(),
                    },
                });
            }
        }
        ops
    }

    /// Evaluates a validated operator against the index.
    ///
    /// # Errors
    ///
    /// Fails for malformed arguments or if the index cannot be read.
    fn query(
        &self,
        index: &DataIndex,
        op: QueryOperator,
        arg: &Value,
        options: &QueryOptions<'_>,
    ) -> IndexResult<IndexQueryResults>;

    /// Evaluates an operator directly against a record's indexed value,
    /// without consulting the tree.
    ///
    /// # Errors
    ///
    /// Fails for malformed arguments.
    fn test(
        &self,
        index: &DataIndex,
        value: &Value,
        op: QueryOperator,
        arg: &Value,
    ) -> IndexResult<bool>;
}

/// Creates the variant for a descriptor's index kind.
///
/// # Errors
///
/// Fails if a full-text tokenizer pattern does not compile.
pub(crate) fn variant_for(descriptor: &IndexDescriptor) -> IndexResult<Box<dyn IndexVariant>> {
    Ok(match descriptor.kind {
        IndexKind::Normal => Box::new(NormalIndex),
        IndexKind::Array => Box::new(ArrayIndex),
        IndexKind::FullText => Box::new(FullTextIndex::new(descriptor.text.clone())?),
        IndexKind::Geo => Box::new(GeoIndex),
    })
}

/// One tree search of a multi-part query.
#[derive(Debug)]
pub(crate) struct Probe {
    pub op: &'static str,
    pub argument: String,
    pub query: TreeQuery,
}

impl Probe {
    pub(crate) fn stats(&self) -> IndexQueryStats {
        IndexQueryStats::new(self.op, self.argument.clone())
    }
}

/// Counts the values each probe matches.
pub(crate) fn count_probes(index: &DataIndex, probes: Vec<Probe>) -> IndexResult<Vec<(usize, Probe)>> {
    probes
        .into_iter()
        .map(|probe| Ok((index.count_query(&probe.query)?, probe)))
        .collect()
}

/// Returns the records matched by every probe.
///
/// Probes are counted first and evaluated rarest first, each one filtered
/// by the results so far; a probe without matches ends the search.
pub(crate) fn narrow(
    index: &DataIndex,
    probes: Vec<Probe>,
    options: &QueryOptions<'_>,
    stats: IndexQueryStats,
) -> IndexResult<IndexQueryResults> {
    let counted = count_probes(index, probes)?;
    narrow_counted(index, counted, options, stats)
}

/// [`narrow`] over probes that have already been counted.
pub(crate) fn narrow_counted(
    index: &DataIndex,
    mut counted: Vec<(usize, Probe)>,
    options: &QueryOptions<'_>,
    mut stats: IndexQueryStats,
) -> IndexResult<IndexQueryResults> {
    let started = Instant::now();
    counted.sort_by_key(|(count, _)| *count);

    let mut current: Option<IndexQueryResults> = None;
    for (count, probe) in counted {
        if count == 0 {
            current = None;
            break;
        }
        let step = {
            let step_options = QueryOptions {
                filter: current.as_ref().or(options.filter),
            };
            index.search(&probe.query, &step_options, probe.stats())?
        };
        stats.steps.push(step.stats.clone());
        let exhausted = step.is_empty();
        current = Some(step);
        if exhausted {
            break;
        }
    }

    let results = current.map(|r| r.results).unwrap_or_default();
    stats.finish(started, results.len());
    Ok(IndexQueryResults::new(results, stats))
}
