//! Plain value indexes.

use super::base::DataIndex;
use super::descriptor::{IndexDescriptor, IndexKind};
use super::query::{tree_query, QueryOperator, QueryOptions};
use super::results::{IndexQueryResults, IndexQueryStats};
use super::variant::IndexVariant;
use crate::error::IndexResult;
use arbordb_codec::{IndexValue, Metadata, Value};

/// Indexes the primitive value of a key. Null, arrays and objects are
/// not indexed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalIndex;

impl IndexVariant for NormalIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Normal
    }

    fn valid_operators(&self) -> &'static [QueryOperator] {
        QueryOperator::BASE
    }

    fn extract(
        &self,
        _descriptor: &IndexDescriptor,
        value: &Value,
        _locale: &str,
    ) -> IndexResult<Vec<(IndexValue, Metadata)>> {
        Ok(IndexValue::from_value(value)
            .map(|key| vec![(key, Metadata::new())])
            .unwrap_or_default())
    }

    fn query(
        &self,
        index: &DataIndex,
        op: QueryOperator,
        arg: &Value,
        options: &QueryOptions<'_>,
    ) -> IndexResult<IndexQueryResults> {
        let query = tree_query(
            op,
            arg,
            &|v| index.normalize_argument(v),
            index.descriptor.case_sensitive,
        )?;
        index.search(
            &query,
            options,
            IndexQueryStats::new(op.as_str(), arg.canonical_string()),
        )
    }

    fn test(
        &self,
        index: &DataIndex,
        value: &Value,
        op: QueryOperator,
        arg: &Value,
    ) -> IndexResult<bool> {
        let query = tree_query(
            op,
            arg,
            &|v| index.normalize_argument(v),
            index.descriptor.case_sensitive,
        )?;
        Ok(match IndexValue::from_value(value) {
            Some(key) => query.matches(&index.normalize_argument(key)),
            None => op == QueryOperator::NotExists,
        })
    }
}
