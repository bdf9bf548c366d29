//! Node rows and their attribute values.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::Path;

/// Store-assigned node identifier.
pub type NodeId = u64;

/// Attribute map of a node, keyed by field name.
pub type Attributes = BTreeMap<String, Value>;

/// Field names that always resolve to the node id.
pub const ID_FIELDS: [&str; 2] = ["id", "pk"];

static NULL_VALUE: Value = Value::Null;

/// An attribute value.
///
/// Values are totally ordered so that sibling ranking never depends on the store:
/// numbers (booleans as 0/1) sort before text, which sorts before nulls. Text compares
/// byte-wise. This matches how SQLite orders the JSON-extracted column with a
/// leading `IS NULL` sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing or null value.
    Null,
    /// Boolean, ranked as 0 or 1.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number. NaN ranks like null.
    Float(f64),
    /// UTF-8 text.
    Text(String),
}

impl Value {
    /// Total order used for sibling ranking.
    pub fn rank_cmp(&self, other: &Value) -> Ordering {
        let class = self.class().cmp(&other.class());
        if class != Ordering::Equal {
            return class;
        }
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => match (self.as_integer(), other.as_integer()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => match (self.as_float(), other.as_float()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                },
            },
        }
    }

    /// Returns `true` for nulls and NaN.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Borrows the text content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn class(&self) -> u8 {
        match self {
            _ if self.is_null() => 2,
            Value::Text(_) => 1,
            _ => 0,
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_integer().map(|i| i as f64),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A persisted tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Store-assigned identifier.
    pub id: NodeId,
    /// Parent reference; `None` marks a root.
    pub parent: Option<NodeId>,
    /// User attributes, including the rank fields.
    pub attributes: Attributes,
    /// Materialized path; `None` until the engine resolves it.
    pub path: Option<Path>,
}

impl Node {
    /// Creates a detached root node without attributes or path.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            parent: None,
            attributes: Attributes::new(),
            path: None,
        }
    }

    /// Returns the attribute value, or `Null` when missing.
    pub fn attribute(&self, field: &str) -> &Value {
        self.attributes.get(field).unwrap_or(&NULL_VALUE)
    }

    /// Returns the text attribute, if present.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.attribute(field).as_str()
    }

    /// Value used when ranking on `field`; `id` and `pk` resolve to the node id.
    pub fn rank_value(&self, field: &str) -> Cow<'_, Value> {
        if ID_FIELDS.contains(&field) {
            Cow::Owned(Value::Int(self.id as i64))
        } else {
            Cow::Borrowed(self.attribute(field))
        }
    }

    /// Sets an attribute.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(field.into(), value.into());
    }
}

/// A node about to be inserted; the store assigns its id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNode {
    /// Parent reference; `None` inserts a root.
    pub parent: Option<NodeId>,
    /// Initial attributes.
    pub attributes: Attributes,
    /// Raw path, only honoured while automatic maintenance is disabled.
    pub path: Option<Path>,
}

impl NewNode {
    /// A new root.
    pub fn root() -> Self {
        Self::default()
    }

    /// A new child of `parent`.
    pub fn child_of(parent: NodeId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Adds an attribute.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    /// Sets a raw path for imports that bypass maintenance.
    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    pub(crate) fn into_node(self, id: NodeId) -> Node {
        Node {
            id,
            parent: self.parent,
            attributes: self.attributes,
            path: self.path,
        }
    }
}
