//! Core transform layer types
//!
//! - DestinationEntry: one typed record in the destination schema
//! - CorrelationKey: the value a transform indexes its records under

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// One (type, payload) unit produced by a transform.
///
/// The payload may reference other entries by their natural keys; those
/// references are resolved by the backing store, never here.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationEntry {
    pub entry_type: String,
    pub payload: Map<String, Value>,
}

impl DestinationEntry {
    pub fn new(entry_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            entry_type: entry_type.into(),
            payload,
        }
    }

    /// Start an entry with an empty payload.
    pub fn of_type(entry_type: impl Into<String>) -> Self {
        Self::new(entry_type, Map::new())
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Serializes as `{"<type>": payload}`, the shape the graph API ingests.
impl Serialize for DestinationEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.entry_type, &self.payload)?;
        map.end()
    }
}

/// Key under which a record is indexed in the correlation context.
///
/// Numbers and strings with the same text collide on purpose: upstream APIs
/// are inconsistent about whether ids are quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from a JSON value. Null and empty strings yield no key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Bool(b) => Some(Self(b.to_string())),
            other => Some(Self(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for CorrelationKey {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}
