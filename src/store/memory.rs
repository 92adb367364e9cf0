use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{content_hash, rank, Candidate, MetadataFilter, VectorIndex};
use crate::models::{DocumentRecord, ResultSet};

/// Process-local index. Nothing is persisted.
#[derive(Default)]
pub struct InMemoryIndex {
    records: RwLock<BTreeMap<String, (DocumentRecord, String)>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index already holding `records`.
    pub async fn with_records(records: Vec<DocumentRecord>) -> Result<Self> {
        let index = Self::new();
        index.upsert(&records, "memory").await?;
        Ok(index)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: &[DocumentRecord], _model: &str) -> Result<()> {
        let mut guard = self.records.write().await;
        for record in records {
            let hash = content_hash(&record.text, &record.metadata);
            guard.insert(record.id.clone(), (record.clone(), hash));
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, filter: &MetadataFilter) -> Result<ResultSet> {
        let guard = self.records.read().await;
        let candidates = guard.values().map(|(record, _)| Candidate {
            id: record.id.clone(),
            text: record.text.clone(),
            metadata: record.metadata.clone(),
            embedding: record.embedding.clone(),
        });
        Ok(rank(candidates, query, k, filter))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    async fn content_hashes(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|(id, (_, hash))| (id.clone(), hash.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn replace_all(&self, records: &[DocumentRecord], _model: &str) -> Result<()> {
        let fresh: BTreeMap<String, (DocumentRecord, String)> = records
            .iter()
            .map(|record| {
                let hash = content_hash(&record.text, &record.metadata);
                (record.id.clone(), (record.clone(), hash))
            })
            .collect();
        *self.records.write().await = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocKind, Metadata};

    fn record(id: &str, kind: DocKind, embedding: Vec<f32>) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            text: format!("record {}", id),
            embedding,
            metadata: Metadata::new().with("type", kind.as_str()),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[record("m1", DocKind::Match, vec![1.0, 0.0])], "m")
            .await
            .unwrap();
        let mut updated = record("m1", DocKind::Match, vec![0.0, 1.0]);
        updated.text = "changed".to_string();
        index.upsert(&[updated], "m").await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        let hits = index
            .search(&[0.0, 1.0], 5, &MetadataFilter::none())
            .await
            .unwrap();
        assert_eq!(hits.documents(), vec!["changed"]);
    }

    #[tokio::test]
    async fn test_search_with_kind_filter() {
        let index = InMemoryIndex::with_records(vec![
            record("s1", DocKind::Standing, vec![1.0, 0.0]),
            record("m1", DocKind::Match, vec![0.5, 0.5]),
        ])
        .await
        .unwrap();
        let hits = index
            .search(&[1.0, 0.0], 5, &MetadataFilter::kind(DocKind::Match))
            .await
            .unwrap();
        assert_eq!(hits.ids(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_clear_empties_index() {
        let index = InMemoryIndex::with_records(vec![record("m1", DocKind::Match, vec![1.0])])
            .await
            .unwrap();
        index.clear().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.content_hashes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_drops_records_not_in_the_new_set() {
        let index = InMemoryIndex::with_records(vec![
            record("m1", DocKind::Match, vec![1.0]),
            record("m2", DocKind::Match, vec![1.0]),
        ])
        .await
        .unwrap();
        index
            .replace_all(&[record("m3", DocKind::Match, vec![1.0])], "m")
            .await
            .unwrap();

        let hits = index.search(&[1.0], 10, &MetadataFilter::none()).await.unwrap();
        assert_eq!(hits.ids(), vec!["m3"]);
    }
}
