//! Vector index abstraction.
//!
//! A [`VectorIndex`] stores [`DocumentRecord`]s and answers nearest-neighbour
//! queries with an optional exact-match [`MetadataFilter`]. Two backends ship:
//!
//! - [`SqliteIndex`]: persistent, the default for the CLI and server.
//! - [`InMemoryIndex`]: process-local, used by tests.
//!
//! Both rank by cosine distance (`1 - cosine_similarity`, lower is closer)
//! with ties broken by record id, so the same data yields the same order
//! on either backend.

mod memory;
mod sqlite;

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::embedding::cosine_distance;
use crate::models::{DocKind, DocumentRecord, Metadata, QueryResultItem, ResultSet};

/// Conjunction of exact `key == value` constraints on record metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    clauses: Vec<(String, Value)>,
}

impl MetadataFilter {
    /// Matches every record.
    pub fn none() -> Self {
        Self::default()
    }

    /// `type == kind`.
    pub fn kind(kind: DocKind) -> Self {
        Self::none().and(Self::TYPE_KEY, kind.as_str())
    }

    pub fn and(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((key.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.clauses
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }

    const TYPE_KEY: &'static str = "type";
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records by id. `model` records which embedding
    /// model produced the vectors.
    async fn upsert(&self, records: &[DocumentRecord], model: &str) -> Result<()>;

    /// Up to `k` records passing `filter`, nearest first.
    async fn search(&self, query: &[f32], k: usize, filter: &MetadataFilter) -> Result<ResultSet>;

    async fn count(&self) -> Result<usize>;

    /// Content hash of every stored record, keyed by id.
    async fn content_hashes(&self) -> Result<HashMap<String, String>>;

    async fn clear(&self) -> Result<()>;

    /// Swap the whole contents for `records` in one step. Readers see either
    /// the old records or the new ones, never an empty index in between.
    async fn replace_all(&self, records: &[DocumentRecord], model: &str) -> Result<()>;
}

/// SHA-256 over a record's text and metadata. Changes whenever anything the
/// index would return for the record changes.
pub fn content_hash(text: &str, metadata: &Metadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(metadata.to_json_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A stored record as seen by the ranking step.
pub(crate) struct Candidate {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// Filter, score, and order candidates; shared by both backends.
pub(crate) fn rank(
    candidates: impl IntoIterator<Item = Candidate>,
    query: &[f32],
    k: usize,
    filter: &MetadataFilter,
) -> ResultSet {
    let mut items: Vec<QueryResultItem> = candidates
        .into_iter()
        .filter(|c| c.embedding.len() == query.len())
        .filter(|c| filter.matches(&c.metadata))
        .map(|c| QueryResultItem {
            distance: cosine_distance(query, &c.embedding),
            id: c.id,
            document: c.text,
            metadata: c.metadata,
        })
        .collect();

    items.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    items.truncate(k);

    ResultSet::new(items)
}
