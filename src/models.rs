//! Core data models.
//!
//! [`DocumentRecord`]s are written once by the indexer and only read by the
//! retrieval path. [`QueryResultItem`]s and [`ResultSet`]s are built fresh
//! for each request; the order of a [`ResultSet`] is its relevance signal and
//! must survive every later stage untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of fact a record describes, stored under the `type` metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Match,
    Standing,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Match => "match",
            DocKind::Standing => "standing",
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "match" => Ok(DocKind::Match),
            "standing" => Ok(DocKind::Standing),
            other => Err(format!(
                "invalid type filter '{}': expected 'match' or 'standing'",
                other
            )),
        }
    }
}

/// Record metadata: a flat JSON object.
///
/// Accessors never fail. A missing or mistyped field reads as absent so one
/// malformed record cannot abort a whole retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Parse a stored JSON object, falling back to an empty map.
    pub fn from_json_str(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self(map),
            _ => Self::new(),
        }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value of `key`; numbers and booleans are not coerced.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// The record kind, if the `type` field names a known one.
    pub fn kind(&self) -> Option<DocKind> {
        self.get_str("type").and_then(|t| t.parse().ok())
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Unit stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Stable across re-indexing runs for the same source record.
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResultItem {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// Lower is closer.
    pub distance: f32,
}

/// Ordered search hits, most relevant (or most temporally appropriate)
/// first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub items: Vec<QueryResultItem>,
}

impl ResultSet {
    pub fn new(items: Vec<QueryResultItem>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn documents(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.document.as_str()).collect()
    }

    pub fn metadatas(&self) -> Vec<&Metadata> {
        self.items.iter().map(|i| &i.metadata).collect()
    }

    pub fn distances(&self) -> Vec<f32> {
        self.items.iter().map(|i| i.distance).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.id.as_str()).collect()
    }

    /// Owned metadata in result order, as exposed to callers as "sources".
    pub fn sources(&self) -> Vec<Metadata> {
        self.items.iter().map(|i| i.metadata.clone()).collect()
    }
}
