//! Query operators and their translation into tree searches.

use super::results::IndexQueryResults;
use crate::error::{IndexError, IndexResult};
use crate::tree::{like_regex, TreeQuery};
use arbordb_codec::{IndexValue, Value};
use regex::RegexBuilder;
use std::fmt;

/// A query operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOperator {
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>=`
    GreaterOrEqual,
    /// `>`
    Greater,
    /// `exists`
    Exists,
    /// `!exists`
    NotExists,
    /// `between`
    Between,
    /// `!between`
    NotBetween,
    /// `like`
    Like,
    /// `!like`
    NotLike,
    /// `matches`
    Matches,
    /// `!matches`
    NotMatches,
    /// `in`
    In,
    /// `!in`
    NotIn,
    /// `contains` (array indexes)
    Contains,
    /// `!contains` (array indexes)
    NotContains,
    /// `fulltext:contains`
    FullTextContains,
    /// `fulltext:!contains`
    FullTextNotContains,
    /// `geo:nearby`
    GeoNearby,
}

impl QueryOperator {
    /// Operators supported by every ordered index.
    pub const BASE: &'static [QueryOperator] = &[
        QueryOperator::Less,
        QueryOperator::LessOrEqual,
        QueryOperator::Equal,
        QueryOperator::NotEqual,
        QueryOperator::GreaterOrEqual,
        QueryOperator::Greater,
        QueryOperator::Exists,
        QueryOperator::NotExists,
        QueryOperator::Between,
        QueryOperator::NotBetween,
        QueryOperator::Like,
        QueryOperator::NotLike,
        QueryOperator::Matches,
        QueryOperator::NotMatches,
        QueryOperator::In,
        QueryOperator::NotIn,
    ];

    const ALL: &'static [QueryOperator] = &[
        QueryOperator::Less,
        QueryOperator::LessOrEqual,
        QueryOperator::Equal,
        QueryOperator::NotEqual,
        QueryOperator::GreaterOrEqual,
        QueryOperator::Greater,
        QueryOperator::Exists,
        QueryOperator::NotExists,
        QueryOperator::Between,
        QueryOperator::NotBetween,
        QueryOperator::Like,
        QueryOperator::NotLike,
        QueryOperator::Matches,
        QueryOperator::NotMatches,
        QueryOperator::In,
        QueryOperator::NotIn,
        QueryOperator::Contains,
        QueryOperator::NotContains,
        QueryOperator::FullTextContains,
        QueryOperator::FullTextNotContains,
        QueryOperator::GeoNearby,
    ];

    /// The operator's textual form.
    pub fn as_str(self) -> &'static str {
        match self {
            QueryOperator::Less => "<",
            QueryOperator::LessOrEqual => "<=",
            QueryOperator::Equal => "==",
            QueryOperator::NotEqual => "!=",
            QueryOperator::GreaterOrEqual => ">=",
            QueryOperator::Greater => ">",
            QueryOperator::Exists => "exists",
            QueryOperator::NotExists => "!exists",
            QueryOperator::Between => "between",
            QueryOperator::NotBetween => "!between",
            QueryOperator::Like => "like",
            QueryOperator::NotLike => "!like",
            QueryOperator::Matches => "matches",
            QueryOperator::NotMatches => "!matches",
            QueryOperator::In => "in",
            QueryOperator::NotIn => "!in",
            QueryOperator::Contains => "contains",
            QueryOperator::NotContains => "!contains",
            QueryOperator::FullTextContains => "fulltext:contains",
            QueryOperator::FullTextNotContains => "fulltext:!contains",
            QueryOperator::GeoNearby => "geo:nearby",
        }
    }

    /// Parses an operator from its textual form.
    pub fn parse(op: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|o| o.as_str() == op)
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions<'a> {
    /// Only return records that are also in this earlier result set.
    pub filter: Option<&'a IndexQueryResults>,
}

impl<'a> QueryOptions<'a> {
    /// Restricts results to records in `results`.
    #[must_use]
    pub fn filter(results: &'a IndexQueryResults) -> Self {
        Self {
            filter: Some(results),
        }
    }
}

fn scalar(op: QueryOperator, arg: &Value) -> IndexResult<IndexValue> {
    IndexValue::from_value(arg).ok_or_else(|| {
        IndexError::invalid_argument(format!(
            "operator \"{op}\" needs a primitive value, got {}",
            arg.type_name()
        ))
    })
}

fn scalars(op: QueryOperator, arg: &Value) -> IndexResult<Vec<IndexValue>> {
    let items = arg.as_array().ok_or_else(|| {
        IndexError::invalid_argument(format!(
            "operator \"{op}\" needs an array, got {}",
            arg.type_name()
        ))
    })?;
    items.iter().map(|item| scalar(op, item)).collect()
}

fn pattern(op: QueryOperator, arg: &Value) -> IndexResult<&str> {
    arg.as_str().ok_or_else(|| {
        IndexError::invalid_argument(format!(
            "operator \"{op}\" needs a string, got {}",
            arg.type_name()
        ))
    })
}

fn invalid_pattern(err: regex::Error) -> IndexError {
    IndexError::invalid_argument(format!("invalid pattern: {err}"))
}

/// Translates a base operator and its argument into a tree search.
///
/// `normalize` is applied to every value argument, so that a
/// case-insensitive index compares lowercased strings. Regular expressions
/// are matched case-insensitively unless `case_sensitive` is set.
///
/// # Errors
///
/// Returns [`IndexError::InvalidArgument`] if the argument has the wrong
/// shape for the operator, and [`IndexError::UnsupportedOperator`] for
/// operators that are not base operators.
pub fn tree_query(
    op: QueryOperator,
    arg: &Value,
    normalize: &dyn Fn(IndexValue) -> IndexValue,
    case_sensitive: bool,
) -> IndexResult<TreeQuery> {
    let value = |arg: &Value| scalar(op, arg).map(normalize);
    let query = match op {
        QueryOperator::Less => TreeQuery::Less(value(arg)?),
        QueryOperator::LessOrEqual => TreeQuery::LessOrEqual(value(arg)?),
        QueryOperator::Equal => TreeQuery::Equal(value(arg)?),
        QueryOperator::NotEqual => TreeQuery::NotEqual(value(arg)?),
        QueryOperator::GreaterOrEqual => TreeQuery::GreaterOrEqual(value(arg)?),
        QueryOperator::Greater => TreeQuery::Greater(value(arg)?),
        QueryOperator::Exists => TreeQuery::Exists,
        QueryOperator::NotExists => TreeQuery::NotExists,
        QueryOperator::Between | QueryOperator::NotBetween => {
            let mut bounds = scalars(op, arg)?.into_iter().map(normalize);
            let (Some(a), Some(b), None) = (bounds.next(), bounds.next(), bounds.next()) else {
                return Err(IndexError::invalid_argument(format!(
                    "operator \"{op}\" needs exactly two values"
                )));
            };
            if op == QueryOperator::Between {
                TreeQuery::between(a, b)
            } else {
                TreeQuery::not_between(a, b)
            }
        }
        QueryOperator::Like | QueryOperator::NotLike => {
            let re = like_regex(pattern(op, arg)?).map_err(invalid_pattern)?;
            if op == QueryOperator::Like {
                TreeQuery::Like(re)
            } else {
                TreeQuery::NotLike(re)
            }
        }
        QueryOperator::Matches | QueryOperator::NotMatches => {
            let re = RegexBuilder::new(pattern(op, arg)?)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(invalid_pattern)?;
            if op == QueryOperator::Matches {
                TreeQuery::Matches(re)
            } else {
                TreeQuery::NotMatches(re)
            }
        }
        QueryOperator::In => TreeQuery::In(scalars(op, arg)?.into_iter().map(normalize).collect()),
        QueryOperator::NotIn => {
            TreeQuery::NotIn(scalars(op, arg)?.into_iter().map(normalize).collect())
        }
        other => {
            return Err(IndexError::UnsupportedOperator {
                operator: other.as_str().to_string(),
                kind: "normal",
            })
        }
    };
    Ok(query)
}

/// Returns true if a `contains` argument should be matched as a pattern.
pub(crate) fn has_wildcards(value: &str) -> bool {
    value.contains(['*', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same(v: IndexValue) -> IndexValue {
        v
    }

    #[test]
    fn operators_parse_back() {
        for op in QueryOperator::ALL {
            assert_eq!(QueryOperator::parse(op.as_str()), Some(*op));
        }
        assert_eq!(QueryOperator::parse("~="), None);
        assert_eq!(QueryOperator::BASE.len(), 16);
    }

    #[test]
    fn between_orders_bounds() {
        let arg = Value::from(vec![Value::from(10), Value::from(1)]);
        let query = tree_query(QueryOperator::Between, &arg, &same, false).unwrap();
        assert!(query.matches(&IndexValue::from(5.0)));
        assert!(!query.matches(&IndexValue::from(11.0)));
    }

    #[test]
    fn argument_shapes_are_checked() {
        let err = tree_query(QueryOperator::Equal, &Value::Array(vec![]), &same, false);
        assert!(matches!(err, Err(IndexError::InvalidArgument { .. })));
        let err = tree_query(QueryOperator::Between, &Value::from(vec![Value::from(1)]), &same, false);
        assert!(matches!(err, Err(IndexError::InvalidArgument { .. })));
        let err = tree_query(QueryOperator::Like, &Value::from(1), &same, false);
        assert!(matches!(err, Err(IndexError::InvalidArgument { .. })));
        let err = tree_query(QueryOperator::Contains, &Value::from("x"), &same, false);
        assert!(matches!(err, Err(IndexError::UnsupportedOperator { .. })));
    }

    #[test]
    fn normalization_applies_to_values() {
        let lower = |v: IndexValue| match v {
            IndexValue::String(s) => IndexValue::String(s.to_lowercase()),
            other => other,
        };
        let query = tree_query(QueryOperator::Equal, &Value::from("Ewout"), &lower, false).unwrap();
        assert!(query.matches(&IndexValue::from("ewout")));

        let query = tree_query(QueryOperator::Matches, &Value::from("^EW"), &lower, false).unwrap();
        assert!(query.matches(&IndexValue::from("ewout")));
        let query = tree_query(QueryOperator::Matches, &Value::from("^EW"), &lower, true).unwrap();
        assert!(!query.matches(&IndexValue::from("ewout")));
    }
}
