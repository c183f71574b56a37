//! Operator evaluation against tree keys.

use arbordb_codec::IndexValue;
use regex::{Regex, RegexBuilder};

/// Builds the case-insensitive matcher for a `like` pattern, where `*`
/// matches any run of characters and `?` exactly one.
///
/// # Errors
///
/// Fails only if the generated expression exceeds the regex size limit.
pub fn like_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    RegexBuilder::new(&expr)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
}

/// A search over tree keys.
#[derive(Debug, Clone)]
pub enum TreeQuery {
    /// `<`
    Less(IndexValue),
    /// `<=`
    LessOrEqual(IndexValue),
    /// `==`
    Equal(IndexValue),
    /// `!=`
    NotEqual(IndexValue),
    /// `>=`
    GreaterOrEqual(IndexValue),
    /// `>`
    Greater(IndexValue),
    /// Any key except the `Undefined` sentinel.
    Exists,
    /// Only the `Undefined` sentinel.
    NotExists,
    /// Inclusive range.
    Between(IndexValue, IndexValue),
    /// Outside the inclusive range.
    NotBetween(IndexValue, IndexValue),
    /// String keys matching a wildcard pattern.
    Like(Regex),
    /// Keys not matching a wildcard pattern.
    NotLike(Regex),
    /// String keys matching a regular expression.
    Matches(Regex),
    /// Keys not matching a regular expression.
    NotMatches(Regex),
    /// Keys equal to one of the values.
    In(Vec<IndexValue>),
    /// Keys equal to none of the values.
    NotIn(Vec<IndexValue>),
    /// String keys starting with a prefix, compared case-sensitively.
    StartsWith(String),
}

fn string_matches(re: &Regex, key: &IndexValue) -> bool {
    key.as_str().is_some_and(|s| re.is_match(s))
}

impl TreeQuery {
    /// Creates a range query, ordering the bounds.
    pub fn between(a: IndexValue, b: IndexValue) -> Self {
        if a <= b {
            TreeQuery::Between(a, b)
        } else {
            TreeQuery::Between(b, a)
        }
    }

    /// Creates a negated range query, ordering the bounds.
    pub fn not_between(a: IndexValue, b: IndexValue) -> Self {
        if a <= b {
            TreeQuery::NotBetween(a, b)
        } else {
            TreeQuery::NotBetween(b, a)
        }
    }

    /// Returns true if `key` satisfies the query.
    pub fn matches(&self, key: &IndexValue) -> bool {
        match self {
            TreeQuery::Less(v) => key < v,
            TreeQuery::LessOrEqual(v) => key <= v,
            TreeQuery::Equal(v) => key == v,
            TreeQuery::NotEqual(v) => key != v,
            TreeQuery::GreaterOrEqual(v) => key >= v,
            TreeQuery::Greater(v) => key > v,
            TreeQuery::Exists => !key.is_undefined(),
            TreeQuery::NotExists => key.is_undefined(),
            TreeQuery::Between(lo, hi) => key >= lo && key <= hi,
            TreeQuery::NotBetween(lo, hi) => key < lo || key > hi,
            TreeQuery::Like(re) | TreeQuery::Matches(re) => string_matches(re, key),
            TreeQuery::NotLike(re) | TreeQuery::NotMatches(re) => !string_matches(re, key),
            TreeQuery::In(values) => values.contains(key),
            TreeQuery::NotIn(values) => !values.contains(key),
            TreeQuery::StartsWith(prefix) => key.as_str().is_some_and(|s| s.starts_with(prefix)),
        }
    }

    /// Inclusive key bounds outside which no key can match.
    pub(crate) fn bounds(&self) -> (Option<IndexValue>, Option<IndexValue>) {
        match self {
            TreeQuery::Less(v) | TreeQuery::LessOrEqual(v) => (None, Some(v.clone())),
            TreeQuery::Equal(v) => (Some(v.clone()), Some(v.clone())),
            TreeQuery::GreaterOrEqual(v) | TreeQuery::Greater(v) => (Some(v.clone()), None),
            TreeQuery::NotExists => (Some(IndexValue::Undefined), Some(IndexValue::Undefined)),
            TreeQuery::Between(lo, hi) => (Some(lo.clone()), Some(hi.clone())),
            TreeQuery::In(values) => (values.iter().min().cloned(), values.iter().max().cloned()),
            TreeQuery::StartsWith(prefix) => (
                Some(IndexValue::String(prefix.clone())),
                Some(IndexValue::String(format!("{prefix}\u{10FFFF}"))),
            ),
            _ => (None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_case_insensitive() {
        let re = like_regex("Br*n?").unwrap();
        assert!(re.is_match("browns"));
        assert!(re.is_match("BRAINS"));
        assert!(!re.is_match("brown"));
        assert!(!re.is_match("brown fox"));
        assert!(!like_regex("a.c").unwrap().is_match("abc"));
    }

    #[test]
    fn relational_operators() {
        let five = IndexValue::from(5.0);
        assert!(TreeQuery::Less(five.clone()).matches(&IndexValue::from(4.0)));
        assert!(!TreeQuery::Less(five.clone()).matches(&five));
        assert!(TreeQuery::LessOrEqual(five.clone()).matches(&five));
        assert!(TreeQuery::Greater(five.clone()).matches(&IndexValue::from("a")));
        assert!(TreeQuery::NotEqual(five.clone()).matches(&IndexValue::Undefined));
    }

    #[test]
    fn between_orders_bounds() {
        let q = TreeQuery::between(IndexValue::from(10.0), IndexValue::from(1.0));
        assert!(q.matches(&IndexValue::from(1.0)));
        assert!(q.matches(&IndexValue::from(10.0)));
        assert!(!q.matches(&IndexValue::from(11.0)));
        let q = TreeQuery::not_between(IndexValue::from(10.0), IndexValue::from(1.0));
        assert!(q.matches(&IndexValue::from(11.0)));
        assert!(!q.matches(&IndexValue::from(5.0)));
    }

    #[test]
    fn exists_and_in() {
        assert!(TreeQuery::Exists.matches(&IndexValue::from(false)));
        assert!(!TreeQuery::Exists.matches(&IndexValue::Undefined));
        assert!(TreeQuery::NotExists.matches(&IndexValue::Undefined));
        let q = TreeQuery::In(vec![IndexValue::from("a"), IndexValue::from(2.0)]);
        assert!(q.matches(&IndexValue::from(2.0)));
        assert!(!q.matches(&IndexValue::from("b")));
        assert_eq!(
            q.bounds(),
            (Some(IndexValue::from(2.0)), Some(IndexValue::from("a")))
        );
    }

    #[test]
    fn starts_with_bounds_cover_prefix() {
        let q = TreeQuery::StartsWith("u12".into());
        let (lo, hi) = q.bounds();
        let key = IndexValue::from("u120fxw");
        assert!(lo.unwrap() <= key && key <= hi.unwrap());
        assert!(q.matches(&key));
        assert!(!q.matches(&IndexValue::from("U120")));
    }
}
