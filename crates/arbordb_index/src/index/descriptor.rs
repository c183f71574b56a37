//! Index descriptors.

use crate::config::{FullTextConfig, IndexOptions};
use crate::error::{IndexError, IndexResult};
use crate::path::PathPattern;
use arbordb_codec::{InfoBlock, InfoValue};
use std::fmt;

/// Indexed key meaning "the record's own key".
pub const KEY_SENTINEL: &str = "{key}";

/// Version of the descriptor info stored in index files.
const DESCRIPTOR_VERSION: f64 = 1.0;

/// Kind of index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Ordered index over primitive values.
    Normal,
    /// Membership index over array elements.
    Array,
    /// Word index over text.
    FullText,
    /// Geohash index over `{lat, long}` objects.
    Geo,
}

impl IndexKind {
    /// Type tag stored in index files.
    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Normal => "normal",
            IndexKind::Array => "array",
            IndexKind::FullText => "fulltext",
            IndexKind::Geo => "geo",
        }
    }

    /// Parses a type tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "normal" => Some(IndexKind::Normal),
            "array" => Some(IndexKind::Array),
            "fulltext" => Some(IndexKind::FullText),
            "geo" => Some(IndexKind::Geo),
            _ => None,
        }
    }

    fn file_suffix(self) -> &'static str {
        match self {
            IndexKind::Normal => "",
            IndexKind::Array => "array.",
            IndexKind::FullText => "fulltext.",
            IndexKind::Geo => "geo.",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn escape(name: &str) -> String {
    name.replace('/', "~").replace('*', "#")
}

/// Everything that defines an index.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    /// Path whose children are the indexed records.
    pub path: PathPattern,
    /// Indexed key, or [`KEY_SENTINEL`].
    pub key: String,
    /// Keys copied into each entry's metadata.
    pub include: Vec<String>,
    /// Compare strings case-sensitively.
    pub case_sensitive: bool,
    /// Default locale.
    pub locale: String,
    /// Record key holding a per-record locale.
    pub locale_key: Option<String>,
    /// Index kind.
    pub kind: IndexKind,
    /// Text analysis options (full-text indexes).
    pub text: FullTextConfig,
}

impl IndexDescriptor {
    /// Creates and validates a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidArgument`] for an empty key, a malformed
    /// path, or a non-normal index on the record-key sentinel.
    pub fn new(path: &str, key: &str, options: IndexOptions) -> IndexResult<Self> {
        if key.is_empty() {
            return Err(IndexError::invalid_argument("index key must not be empty"));
        }
        if key == KEY_SENTINEL && options.kind != IndexKind::Normal {
            return Err(IndexError::invalid_argument(format!(
                "{} indexes cannot index the record key",
                options.kind
            )));
        }
        if options.include.iter().any(|k| k.is_empty()) {
            return Err(IndexError::invalid_argument("included keys must not be empty"));
        }
        Ok(Self {
            path: PathPattern::parse(path)?,
            key: key.to_string(),
            include: options.include,
            case_sensitive: options.case_sensitive,
            locale: options.locale,
            locale_key: options.locale_key,
            kind: options.kind,
            text: options.text,
        })
    }

    /// Returns true if the record's own key is indexed.
    pub fn indexes_record_key(&self) -> bool {
        self.key == KEY_SENTINEL
    }

    /// Keys to read from each record.
    pub fn read_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.include.len() + 2);
        if !self.indexes_record_key() {
            keys.push(self.key.clone());
        }
        keys.extend(self.include.iter().cloned());
        keys.extend(self.locale_key.iter().cloned());
        keys.dedup();
        keys
    }

    /// Canonical description used in logs and errors.
    pub fn description(&self) -> String {
        let mut description = format!("/{}/*/{}", self.path, self.key).replace("//", "/");
        if !self.include.is_empty() {
            description.push_str(&format!(" +[{}]", self.include.join(",")));
        }
        description.push_str(&format!(" ({})", self.kind));
        description
    }

    /// File name of the index within its directory.
    pub fn file_name(&self) -> String {
        let mut name = format!("{}-{}", escape(&self.path.to_string()), escape(&self.key));
        if !self.include.is_empty() {
            let include: Vec<String> = self.include.iter().map(|k| escape(k)).collect();
            name.push('-');
            name.push_str(&include.join(","));
        }
        name.push('.');
        name.push_str(self.kind.file_suffix());
        name.push_str("idx");
        name
    }

    /// Describes the index for the file header.
    pub fn to_info(&self) -> InfoBlock {
        let strings =
            |list: &[String]| InfoValue::Array(list.iter().map(|s| InfoValue::from(s.as_str())).collect());
        let mut info = InfoBlock::new()
            .with("type", self.kind.as_str())
            .with("version", DESCRIPTOR_VERSION)
            .with("path", self.path.to_string())
            .with("key", self.key.as_str())
            .with("include", strings(&self.include))
            .with("cs", self.case_sensitive)
            .with("locale", self.locale.as_str())
            .with(
                "localeKey",
                self.locale_key
                    .as_deref()
                    .map_or(InfoValue::Undefined, InfoValue::from),
            );
        if self.kind == IndexKind::FullText {
            let text = &self.text;
            #[allow(clippy::cast_precision_loss)]
            let number = |n: usize| n as f64;
            info.set("minLength", number(text.min_length));
            info.set("maxLength", number(text.max_length));
            info.set("minWildcardLength", number(text.min_wildcard_length));
            info.set("useStoplist", text.use_stoplist);
            info.set("blacklist", strings(&text.blacklist));
            info.set("whitelist", strings(&text.whitelist));
            info.set(
                "pattern",
                text.pattern
                    .as_deref()
                    .map_or(InfoValue::Undefined, InfoValue::from),
            );
        }
        info
    }

    /// Restores a descriptor from a file header.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidFormat`] if a required key is missing.
    pub fn from_info(info: &InfoBlock) -> IndexResult<Self> {
        let string = |name: &str| {
            info.get(name)
                .and_then(InfoValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| IndexError::invalid_format(format!("missing \"{name}\" in header")))
        };
        let strings = |name: &str| -> Vec<String> {
            info.get(name)
                .and_then(InfoValue::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(InfoValue::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let number = |name: &str, default: usize| {
            info.get(name)
                .and_then(InfoValue::as_f64)
                .map_or(default, |n| n as usize)
        };

        let tag = string("type")?;
        let kind = IndexKind::from_tag(&tag)
            .ok_or_else(|| IndexError::invalid_format(format!("unknown index type \"{tag}\"")))?;
        let defaults = FullTextConfig::default();
        let text = FullTextConfig {
            min_length: number("minLength", defaults.min_length),
            max_length: number("maxLength", defaults.max_length),
            use_stoplist: info
                .get("useStoplist")
                .and_then(InfoValue::as_bool)
                .unwrap_or(defaults.use_stoplist),
            blacklist: strings("blacklist"),
            whitelist: strings("whitelist"),
            pattern: info.get("pattern").and_then(InfoValue::as_str).map(str::to_string),
            min_wildcard_length: number("minWildcardLength", defaults.min_wildcard_length),
            stemmer: None,
        };
        let options = IndexOptions {
            kind,
            case_sensitive: info.get("cs").and_then(InfoValue::as_bool).unwrap_or(false),
            locale: string("locale")?,
            locale_key: info.get("localeKey").and_then(InfoValue::as_str).map(str::to_string),
            include: strings("include"),
            text,
        };
        Self::new(&string("path")?, &string("key")?, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_escape_path_and_keys() {
        let descriptor = IndexDescriptor::new(
            "users/$uid/posts",
            "title",
            IndexOptions::new(IndexKind::FullText).include(["date", "tags"]),
        )
        .unwrap();
        assert_eq!(descriptor.file_name(), "users~#~posts-title-date,tags.fulltext.idx");

        let normal = IndexDescriptor::new("songs", "year", IndexOptions::default()).unwrap();
        assert_eq!(normal.file_name(), "songs-year.idx");
    }

    #[test]
    fn description_names_path_key_and_kind() {
        let descriptor =
            IndexDescriptor::new("users/*/posts", "tags", IndexOptions::new(IndexKind::Array))
                .unwrap();
        assert_eq!(descriptor.description(), "/users/*/posts/*/tags (array)");
        let root = IndexDescriptor::new("", "name", IndexOptions::default()).unwrap();
        assert_eq!(root.description(), "/*/name (normal)");
    }

    #[test]
    fn record_key_sentinel_only_for_normal_indexes() {
        assert!(IndexDescriptor::new("users", KEY_SENTINEL, IndexOptions::default()).is_ok());
        for kind in [IndexKind::Array, IndexKind::FullText, IndexKind::Geo] {
            let result = IndexDescriptor::new("users", KEY_SENTINEL, IndexOptions::new(kind));
            assert!(matches!(result, Err(IndexError::InvalidArgument { .. })));
        }
    }

    #[test]
    fn info_roundtrip() {
        let options = IndexOptions::new(IndexKind::FullText)
            .case_sensitive(true)
            .locale("nl")
            .locale_key("lang")
            .include(["date"])
            .text(FullTextConfig {
                min_length: 2,
                blacklist: vec!["spam".into()],
                ..FullTextConfig::default()
            });
        let descriptor = IndexDescriptor::new("posts", "body", options).unwrap();
        let restored = IndexDescriptor::from_info(&descriptor.to_info()).unwrap();
        assert_eq!(restored.file_name(), descriptor.file_name());
        assert!(restored.case_sensitive);
        assert_eq!(restored.locale, "nl");
        assert_eq!(restored.locale_key.as_deref(), Some("lang"));
        assert_eq!(restored.text.min_length, 2);
        assert_eq!(restored.text.blacklist, vec!["spam".to_string()]);
        assert_eq!(restored.read_keys(), vec!["body", "date", "lang"]);
    }

    #[test]
    fn from_info_requires_type() {
        let info = InfoBlock::new().with("path", "x").with("key", "y");
        assert!(matches!(
            IndexDescriptor::from_info(&info),
            Err(IndexError::InvalidFormat { .. })
        ));
    }
}
