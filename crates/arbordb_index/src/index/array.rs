//! Array membership indexes.
//!
//! Every distinct element of an array is stored as its own key. A record
//! whose value is an empty array (or not an array at all) is stored under
//! the `Undefined` sentinel, so negative queries can still return it.

use super::base::DataIndex;
use super::descriptor::{IndexDescriptor, IndexKind};
use super::query::{has_wildcards, QueryOperator, QueryOptions};
use super::results::{IndexQueryResults, IndexQueryStats};
use super::variant::{narrow, IndexVariant, Probe};
use crate::error::{IndexError, IndexResult};
use crate::tree::{like_regex, TreeQuery};
use arbordb_codec::{IndexValue, Metadata, Value};
use std::collections::BTreeSet;

const OPERATORS: &[QueryOperator] = &[QueryOperator::Contains, QueryOperator::NotContains];

/// Indexes the elements of array values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayIndex;

/// Tree search for one element: a pattern if it has wildcards.
fn element_probe(value: IndexValue) -> IndexResult<Probe> {
    match value.as_str() {
        Some(pattern) if has_wildcards(pattern) => Ok(Probe {
            op: "like",
            argument: pattern.to_string(),
            query: TreeQuery::Like(like_regex(pattern).map_err(|e| {
                IndexError::invalid_argument(format!("invalid pattern: {e}"))
            })?),
        }),
        _ => Ok(Probe {
            op: "==",
            argument: value.to_string(),
            query: TreeQuery::Equal(value),
        }),
    }
}

/// The normalized elements of a `contains` argument, and whether it was a
/// list.
fn arguments(index: &DataIndex, arg: &Value) -> IndexResult<(Vec<IndexValue>, bool)> {
    let one = |item: &Value| {
        IndexValue::from_value(item)
            .map(|v| index.normalize_argument(v))
            .ok_or_else(|| {
                IndexError::invalid_argument(format!(
                    "array elements to look for must be primitive, got {}",
                    item.type_name()
                ))
            })
    };
    match arg {
        Value::Array(items) => Ok((items.iter().map(one).collect::<IndexResult<_>>()?, true)),
        other => Ok((vec![one(other)?], false)),
    }
}

impl IndexVariant for ArrayIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Array
    }

    fn valid_operators(&self) -> &'static [QueryOperator] {
        OPERATORS
    }

    fn extract(
        &self,
        _descriptor: &IndexDescriptor,
        value: &Value,
        _locale: &str,
    ) -> IndexResult<Vec<(IndexValue, Metadata)>> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        let elements: BTreeSet<IndexValue> = value
            .as_array()
            .unwrap_or_default()
            .iter()
            .filter_map(IndexValue::from_value)
            .collect();
        if elements.is_empty() {
            return Ok(vec![(IndexValue::Undefined, Metadata::new())]);
        }
        Ok(elements.into_iter().map(|e| (e, Metadata::new())).collect())
    }

    fn query(
        &self,
        index: &DataIndex,
        op: QueryOperator,
        arg: &Value,
        options: &QueryOptions<'_>,
    ) -> IndexResult<IndexQueryResults> {
        let stats = IndexQueryStats::new(op.as_str(), arg.canonical_string());
        let (values, list) = arguments(index, arg)?;
        let probes = values
            .into_iter()
            .map(element_probe)
            .collect::<IndexResult<Vec<_>>>()?;

        match op {
            QueryOperator::Contains if probes.is_empty() => {
                index.scan_excluding(|_, _| false, options, stats)
            }
            QueryOperator::Contains if !list => {
                let probe = probes
                    .into_iter()
                    .next()
                    .ok_or_else(|| IndexError::internal("scalar argument without a probe"))?;
                index.search(&probe.query, options, stats)
            }
            QueryOperator::Contains => narrow(index, probes, options, stats),
            QueryOperator::NotContains => index.scan_excluding(
                |key, _| probes.iter().any(|p| p.query.matches(key)),
                options,
                stats,
            ),
            other => Err(IndexError::UnsupportedOperator {
                operator: other.as_str().to_string(),
                kind: IndexKind::Array.as_str(),
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
        let (values, _) = arguments(index, arg)?;
        let probes = values
            .into_iter()
            .map(element_probe)
            .collect::<IndexResult<Vec<_>>>()?;
        let elements: Vec<IndexValue> = value
            .as_array()
            .unwrap_or_default()
            .iter()
            .filter_map(IndexValue::from_value)
            .map(|v| index.normalize_argument(v))
            .collect();
        let contains = |probe: &Probe| elements.iter().any(|e| probe.query.matches(e));
        match op {
            QueryOperator::Contains if probes.is_empty() => Ok(!value.is_null()),
            QueryOperator::Contains => Ok(probes.iter().all(contains)),
            QueryOperator::NotContains => Ok(!value.is_null() && !probes.iter().any(contains)),
            other => Err(IndexError::UnsupportedOperator {
                operator: other.as_str().to_string(),
                kind: IndexKind::Array.as_str(),
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
            "recipes": {
                "omelette": { "ingredients": ["egg", "Bacon", "cheese"] },
                "scrambled": { "ingredients": ["egg", "butter"] },
                "toast": { "ingredients": ["bread", "butter"] },
                "water": { "ingredients": [] },
                "mystery": { "ingredients": "unknown" },
                "nothing": { "title": "no ingredients key" }
            }
        }))));
        let context = IndexContext::new(dir.path(), store, IndexConfig::default());
        let descriptor = IndexDescriptor::new(
            "recipes",
            "ingredients",
            IndexOptions::new(IndexKind::Array),
        )
        .unwrap();
        let index = DataIndex::new(context, descriptor).unwrap();
        index.build().unwrap();
        (dir, index)
    }

    fn query(index: &DataIndex, op: &str, arg: Value) -> Vec<String> {
        let mut keys: Vec<String> = index
            .query(op, &arg, &QueryOptions::default())
            .unwrap()
            .keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn contains_single_value_and_pattern() {
        let (_dir, index) = built();
        assert_eq!(query(&index, "contains", Value::from("egg")), vec!["omelette", "scrambled"]);
        assert_eq!(query(&index, "contains", Value::from("BACON")), vec!["omelette"]);
        assert_eq!(query(&index, "contains", Value::from("b*")), vec!["omelette", "scrambled", "toast"]);
    }

    #[test]
    fn contains_all_of_a_list() {
        let (_dir, index) = built();
        let both = Value::from(json!(["butter", "egg"]));
        assert_eq!(query(&index, "contains", both), vec!["scrambled"]);
        let missing = Value::from(json!(["egg", "caviar"]));
        assert!(query(&index, "contains", missing).is_empty());
    }

    #[test]
    fn empty_list_matches_every_record_with_the_key() {
        let (_dir, index) = built();
        assert_eq!(
            query(&index, "contains", Value::from(json!([]))),
            vec!["mystery", "omelette", "scrambled", "toast", "water"]
        );
    }

    #[test]
    fn not_contains_keeps_other_elements() {
        let (_dir, index) = built();
        assert_eq!(
            query(&index, "!contains", Value::from("bacon")),
            vec!["mystery", "scrambled", "toast", "water"]
        );
    }

    #[test]
    fn relational_operators_are_rejected() {
        let (_dir, index) = built();
        let err = index
            .query("==", &Value::from("egg"), &QueryOptions::default())
            .unwrap_err();
        assert!(matches!(err.root(), IndexError::UnsupportedOperator { .. }));
    }

    #[test]
    fn updates_apply_the_element_difference() {
        let (_dir, index) = built();
        let old = Value::from(json!({ "ingredients": ["bread", "butter"] }));
        let new = Value::from(json!({ "ingredients": ["bread", "jam"] }));
        index
            .handle_record_update("recipes/toast", Some(&old), Some(&new))
            .unwrap();
        assert_eq!(query(&index, "contains", Value::from("jam")), vec!["toast"]);
        assert_eq!(query(&index, "contains", Value::from("butter")), vec!["scrambled"]);
        assert_eq!(query(&index, "contains", Value::from("bread")), vec!["toast"]);
    }

    #[test]
    fn test_predicate() {
        let (_dir, index) = built();
        let value = Value::from(json!(["Egg", "ham"]));
        assert!(index.test(&value, "contains", &Value::from("egg")).unwrap());
        assert!(index.test(&value, "contains", &Value::from(json!(["egg", "h*"]))).unwrap());
        assert!(!index.test(&value, "contains", &Value::from(json!(["egg", "jam"]))).unwrap());
        assert!(index.test(&value, "!contains", &Value::from("jam")).unwrap());
        assert!(index.test(&value, "contains", &Value::from(json!([]))).unwrap());
    }
}
