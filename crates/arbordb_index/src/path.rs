//! Wildcard path patterns.
//!
//! Paths address nodes in the record tree: `users/ewout/posts`, with array
//! elements written as `list[3]`. An index path may contain wildcards,
//! either `*` or a named `$variable`; both are normalized to `*`. The
//! records of an index are the children of every node matching its path.

use crate::error::{IndexError, IndexResult};
use arbordb_codec::{RecordKey, RecordPointer};
use std::fmt;

/// One segment of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Named child.
    Key(String),
    /// Array element.
    Index(u32),
    /// Any child. Only valid in patterns.
    Wildcard,
}

impl PathSegment {
    /// Converts a record key into a path segment.
    pub fn from_record_key(key: &RecordKey) -> Self {
        match key {
            RecordKey::Name(name) => PathSegment::Key(name.clone()),
            RecordKey::Index(index) => PathSegment::Index(*index),
        }
    }

    pub(crate) fn record_key(&self) -> Option<RecordKey> {
        match self {
            PathSegment::Key(name) => Some(RecordKey::Name(name.clone())),
            PathSegment::Index(index) => Some(RecordKey::Index(*index)),
            PathSegment::Wildcard => None,
        }
    }

    /// The value a wildcard captures when it matches this segment.
    pub(crate) fn capture(&self) -> String {
        match self {
            PathSegment::Key(name) => name.clone(),
            PathSegment::Index(index) => format!("[{index}]"),
            PathSegment::Wildcard => "*".to_string(),
        }
    }

    fn from_capture(capture: &str) -> Self {
        capture
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .and_then(|s| s.parse().ok())
            .map_or_else(|| PathSegment::Key(capture.to_string()), PathSegment::Index)
    }
}

/// Splits a path into segments.
///
/// `allow_wildcards` controls whether `*` and `$name` segments are accepted.
///
/// # Errors
///
/// Returns [`IndexError::InvalidArgument`] for empty segments, malformed
/// array indexes and (when not allowed) wildcards.
pub fn parse_segments(path: &str, allow_wildcards: bool) -> IndexResult<Vec<PathSegment>> {
    let trimmed = path.trim_matches('/');
    let mut segments = Vec::new();
    if trimmed.is_empty() {
        return Ok(segments);
    }
    for part in trimmed.split('/') {
        let (name, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if name.is_empty() && rest.is_empty() {
            return Err(IndexError::invalid_argument(format!(
                "empty segment in path \"{path}\""
            )));
        }
        if !name.is_empty() {
            if name == "*" || name.starts_with('$') {
                if !allow_wildcards {
                    return Err(IndexError::invalid_argument(format!(
                        "wildcard in record path \"{path}\""
                    )));
                }
                segments.push(PathSegment::Wildcard);
            } else {
                segments.push(PathSegment::Key(name.to_string()));
            }
        }
        while !rest.is_empty() {
            let end = rest.find(']').ok_or_else(|| {
                IndexError::invalid_argument(format!("unterminated index in path \"{path}\""))
            })?;
            let inner = &rest[1..end];
            if inner == "*" && allow_wildcards {
                segments.push(PathSegment::Wildcard);
            } else {
                let index = inner.parse().map_err(|_| {
                    IndexError::invalid_argument(format!(
                        "invalid array index \"{inner}\" in path \"{path}\""
                    ))
                })?;
                segments.push(PathSegment::Index(index));
            }
            rest = &rest[end + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(IndexError::invalid_argument(format!(
                    "unexpected \"{rest}\" in path \"{path}\""
                )));
            }
        }
    }
    Ok(segments)
}

/// Formats segments back into a path string.
pub fn format_segments(segments: &[PathSegment]) -> String {
    let mut path = String::new();
    for segment in segments {
        match segment {
            PathSegment::Key(name) => {
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(name);
            }
            PathSegment::Index(index) => {
                path.push_str(&format!("[{index}]"));
            }
            PathSegment::Wildcard => {
                if !path.is_empty() {
                    path.push('/');
                }
                path.push('*');
            }
        }
    }
    path
}

/// Appends a child key to a concrete path.
pub fn child_path(parent: &str, key: &RecordKey) -> String {
    match key {
        RecordKey::Index(index) => format!("{parent}[{index}]"),
        RecordKey::Name(name) if parent.is_empty() => name.clone(),
        RecordKey::Name(name) => format!("{parent}/{name}"),
    }
}

/// A normalized index path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<PathSegment>,
}

impl PathPattern {
    /// Parses a pattern, normalizing `$variable` wildcards to `*`.
    ///
    /// # Errors
    ///
    /// See [`parse_segments`].
    pub fn parse(path: &str) -> IndexResult<Self> {
        Ok(Self {
            segments: parse_segments(path, true)?,
        })
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of wildcards in the pattern.
    pub fn wildcard_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, PathSegment::Wildcard))
            .count()
    }

    /// Matches a record path: the path of a child of a node matching the
    /// pattern. Returns the record's pointer on success.
    pub fn match_record(&self, record_path: &str) -> Option<RecordPointer> {
        let segments = parse_segments(record_path, false).ok()?;
        let (last, parent) = segments.split_last()?;
        if parent.len() != self.segments.len() {
            return None;
        }
        let mut wildcards = Vec::new();
        for (pattern, actual) in self.segments.iter().zip(parent) {
            match pattern {
                PathSegment::Wildcard => wildcards.push(actual.capture()),
                other if other == actual => {}
                _ => return None,
            }
        }
        Some(RecordPointer::new(wildcards, last.record_key()?))
    }

    /// Reconstructs the absolute record path a pointer refers to.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidFormat`] if the pointer's wildcard count
    /// does not match the pattern.
    pub fn resolve(&self, pointer: &RecordPointer) -> IndexResult<String> {
        let mut captures = pointer.wildcards.iter();
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        for segment in &self.segments {
            match segment {
                PathSegment::Wildcard => {
                    let capture = captures.next().ok_or_else(|| {
                        IndexError::invalid_format("record pointer has too few wildcard values")
                    })?;
                    segments.push(PathSegment::from_capture(capture));
                }
                other => segments.push(other.clone()),
            }
        }
        if captures.next().is_some() {
            return Err(IndexError::invalid_format(
                "record pointer has too many wildcard values",
            ));
        }
        segments.push(PathSegment::from_record_key(&pointer.key));
        Ok(format_segments(&segments))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_segments(&self.segments))
    }
}
