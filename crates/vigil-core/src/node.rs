//! Document tree with provenance
//!
//! Every [`Node`] remembers the document it was read from and its path inside
//! that document, so a value reached through `$ref` still points back at the
//! file and line that produced it.

use std::fmt;
use std::sync::Arc;

use serde_yaml::Value;
use url::Url;

use crate::path::JsonPath;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Null,
    Bool(bool),
    Number(serde_yaml::Number),
    String(String),
    Sequence(Vec<Node>),
    /// Entries in document order
    Mapping(Vec<(String, Node)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub value: NodeValue,
    /// Document the value was read from
    pub document: Arc<Url>,
    /// Location inside `document`
    pub path: JsonPath,
}

impl Node {
    /// Build a tree without resolving references
    pub fn from_value(value: &Value, document: &Arc<Url>, path: &JsonPath) -> Self {
        let value = match value {
            Value::Null => NodeValue::Null,
            Value::Bool(b) => NodeValue::Bool(*b),
            Value::Number(n) => NodeValue::Number(n.clone()),
            Value::String(s) => NodeValue::String(s.clone()),
            Value::Sequence(items) => NodeValue::Sequence(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Self::from_value(item, document, &path.join_index(i)))
                    .collect(),
            ),
            Value::Mapping(map) => NodeValue::Mapping(
                map.iter()
                    .map(|(k, v)| {
                        let key = key_to_string(k);
                        let child = Self::from_value(v, document, &path.join_key(key.clone()));
                        (key, child)
                    })
                    .collect(),
            ),
            Value::Tagged(tagged) => return Self::from_value(&tagged.value, document, path),
        };

        Self {
            value,
            document: document.clone(),
            path: path.clone(),
        }
    }

    /// Child by mapping key
    pub fn get(&self, key: &str) -> Option<&Node> {
        match &self.value {
            NodeValue::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Follow a dotted field path (`a.b.0`)
    pub fn get_field(&self, field: &str) -> Option<&Node> {
        let mut current = self;
        for part in field.split('.') {
            current = match &current.value {
                NodeValue::Mapping(_) => current.get(part)?,
                NodeValue::Sequence(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            NodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, NodeValue::Null)
    }

    /// Truthiness the way rule authors expect: empty strings, zero, false and
    /// null are falsy; containers are always truthy.
    pub fn is_truthy(&self) -> bool {
        match &self.value {
            NodeValue::Null => false,
            NodeValue::Bool(b) => *b,
            NodeValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            NodeValue::String(s) => !s.is_empty(),
            NodeValue::Sequence(_) | NodeValue::Mapping(_) => true,
        }
    }

    /// Compare scalars by value, ignoring provenance
    pub fn same_scalar(&self, other: &Value) -> bool {
        match (&self.value, other) {
            (NodeValue::Null, Value::Null) => true,
            (NodeValue::Bool(a), Value::Bool(b)) => a == b,
            (NodeValue::Number(a), Value::Number(b)) => {
                a == b || matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y)
            }
            (NodeValue::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }

    /// Total number of nodes in this subtree
    pub fn count(&self) -> usize {
        1 + match &self.value {
            NodeValue::Sequence(items) => items.iter().map(Node::count).sum(),
            NodeValue::Mapping(entries) => entries.iter().map(|(_, v)| v.count()).sum(),
            _ => 0,
        }
    }
}

impl fmt::Display for Node {
    /// Short rendering used in messages
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            NodeValue::Null => f.write_str("null"),
            NodeValue::Bool(b) => write!(f, "{b}"),
            NodeValue::Number(n) => write!(f, "{n}"),
            NodeValue::String(s) => f.write_str(s),
            NodeValue::Sequence(items) => write!(f, "Array[{}]", items.len()),
            NodeValue::Mapping(entries) => write!(f, "Object{{{}}}", entries.len()),
        }
    }
}

pub(crate) fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
