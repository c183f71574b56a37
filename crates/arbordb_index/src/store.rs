//! Record store collaborator.
//!
//! The index engine never interprets the database's own storage. It reads
//! records through [`RecordStore`]: child enumeration to walk wildcard
//! paths during a build, and selective node reads to fetch the indexed
//! and included keys of each record.

use crate::error::{IndexError, IndexResult};
use crate::path::{parse_segments, PathSegment};
use arbordb_codec::{RecordKey, Value};
use parking_lot::RwLock;

/// Kind of value stored at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Object with named children.
    Object,
    /// Array with indexed children.
    Array,
    /// Primitive value.
    Value,
}

impl NodeKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => NodeKind::Object,
            Value::Array(_) => NodeKind::Array,
            _ => NodeKind::Value,
        }
    }

    /// Returns true if the node can have children.
    pub fn is_container(self) -> bool {
        matches!(self, NodeKind::Object | NodeKind::Array)
    }
}

/// A child node as reported by [`RecordStore::children`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChildInfo {
    /// Key of the child.
    pub key: RecordKey,
    /// Whether the child currently exists.
    pub exists: bool,
    /// Kind of the child's value.
    pub kind: NodeKind,
    /// Storage address of the child, if the store allocates records separately.
    pub address: Option<u64>,
}

/// Read access to the hierarchical record store.
pub trait RecordStore: Send + Sync {
    /// Enumerates the children of the node at `path`.
    ///
    /// A missing node has no children.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn children(&self, path: &str) -> IndexResult<Vec<ChildInfo>>;

    /// Reads the node at `path`.
    ///
    /// When `include` is given and the node is an object, only the listed
    /// child keys are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read_node(&self, path: &str, include: Option<&[String]>) -> IndexResult<Option<Value>>;
}

/// In-memory record store backed by a single [`Value`] tree.
///
/// Used for testing and for embedding the engine without a database.
#[derive(Debug)]
pub struct MemoryStore {
    root: RwLock<Value>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            root: RwLock::new(Value::Object(Default::default())),
        }
    }
}

fn lookup<'a>(root: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, segment| match (segment, node) {
        (PathSegment::Key(name), Value::Object(map)) => map.get(name),
        (PathSegment::Index(index), Value::Array(items)) => items.get(*index as usize),
        _ => None,
    })
}

fn lookup_mut<'a>(root: &'a mut Value, segments: &[PathSegment]) -> IndexResult<&'a mut Value> {
    let mut node = root;
    for segment in segments {
        node = match segment {
            PathSegment::Key(name) => {
                if !matches!(node, Value::Object(_)) {
                    *node = Value::Object(Default::default());
                }
                match node {
                    Value::Object(map) => map.entry(name.clone()).or_insert(Value::Null),
                    _ => return Err(IndexError::internal("object expected")),
                }
            }
            PathSegment::Index(index) => match node {
                Value::Array(items) => {
                    let index = *index as usize;
                    if index > items.len() {
                        return Err(IndexError::invalid_argument(format!(
                            "array index {index} out of bounds"
                        )));
                    }
                    if index == items.len() {
                        items.push(Value::Null);
                    }
                    &mut items[index]
                }
                _ => {
                    return Err(IndexError::invalid_argument(
                        "array index on a non-array node",
                    ))
                }
            },
            PathSegment::Wildcard => {
                return Err(IndexError::invalid_argument("wildcard in record path"))
            }
        };
    }
    Ok(node)
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `root`.
    #[must_use]
    pub fn with_root(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
        }
    }

    /// Returns a copy of the value at `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segments = parse_segments(path, false).ok()?;
        lookup(&self.root.read(), &segments).cloned()
    }

    /// Stores `value` at `path`, creating parent objects as needed.
    ///
    /// Setting `Value::Null` removes the node. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Fails for malformed paths or array indexes past the end of an array.
    pub fn set(&self, path: &str, value: Value) -> IndexResult<Option<Value>> {
        let segments = parse_segments(path, false)?;
        let mut root = self.root.write();
        let Some((last, parent)) = segments.split_last() else {
            let previous = std::mem::replace(&mut *root, value);
            return Ok(Some(previous));
        };

        if value.is_null() {
            let previous = match (last, lookup_parent_mut(&mut root, parent)) {
                (PathSegment::Key(name), Some(Value::Object(map))) => map.remove(name),
                (PathSegment::Index(index), Some(Value::Array(items)))
                    if (*index as usize) < items.len() =>
                {
                    Some(std::mem::replace(&mut items[*index as usize], Value::Null))
                }
                _ => None,
            };
            return Ok(previous.filter(|v| !v.is_null()));
        }

        let node = lookup_mut(&mut root, &segments)?;
        let previous = std::mem::replace(node, value);
        Ok(Some(previous).filter(|v| !v.is_null()))
    }
}

fn lookup_parent_mut<'a>(root: &'a mut Value, segments: &[PathSegment]) -> Option<&'a mut Value> {
    let mut node = root;
    for segment in segments {
        node = match (segment, node) {
            (PathSegment::Key(name), Value::Object(map)) => map.get_mut(name)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get_mut(*index as usize)?,
            _ => return None,
        };
    }
    Some(node)
}

impl RecordStore for MemoryStore {
    fn children(&self, path: &str) -> IndexResult<Vec<ChildInfo>> {
        let segments = parse_segments(path, false)?;
        let root = self.root.read();
        let children = match lookup(&root, &segments) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, value)| ChildInfo {
                    key: RecordKey::Name(name.clone()),
                    exists: !value.is_null(),
                    kind: NodeKind::of(value),
                    address: None,
                })
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, value)| ChildInfo {
                    key: RecordKey::Index(u32::try_from(index).unwrap_or(u32::MAX)),
                    exists: !value.is_null(),
                    kind: NodeKind::of(value),
                    address: None,
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(children)
    }

    fn read_node(&self, path: &str, include: Option<&[String]>) -> IndexResult<Option<Value>> {
        let segments = parse_segments(path, false)?;
        let root = self.root.read();
        let Some(node) = lookup(&root, &segments) else {
            return Ok(None);
        };
        let value = match (node, include) {
            (Value::Object(map), Some(keys)) => Value::Object(
                map.iter()
                    .filter(|(name, _)| keys.iter().any(|k| k == *name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect(),
            ),
            (other, _) => other.clone(),
        };
        Ok(Some(value))
    }
}
