use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;

use super::{content_hash, rank, Candidate, MetadataFilter, VectorIndex};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{DocumentRecord, Metadata, ResultSet};

/// Index persisted in the `records` table.
///
/// Vectors are scanned and scored in Rust. League-scale collections hold a
/// few thousand records, well within a full scan per query.
#[derive(Clone)]
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Wrap an open pool, creating the schema if it is missing.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        crate::migrate::apply(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stored record counts grouped by metadata `type`.
    pub async fn count_by_kind(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(json_extract(metadata_json, '$.type'), 'unknown') AS kind,
                   COUNT(*) AS n
            FROM records
            GROUP BY kind
            ORDER BY kind
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("kind"), row.get::<i64, _>("n")))
            .collect())
    }

    /// Embedding models present in the index with their record counts.
    pub async fn models(&self) -> Result<Vec<(String, i64, i64)>> {
        let rows = sqlx::query(
            "SELECT model, dims, COUNT(*) AS n FROM records GROUP BY model, dims ORDER BY model",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("model"),
                    row.get::<i64, _>("dims"),
                    row.get::<i64, _>("n"),
                )
            })
            .collect())
    }

    /// Unix timestamp of the most recent upsert, if any.
    pub async fn last_indexed_at(&self) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(indexed_at) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(ts)
    }
}

/// Insert or update one record on an open connection or transaction.
async fn write_record(
    conn: &mut SqliteConnection,
    record: &DocumentRecord,
    model: &str,
    now: i64,
) -> Result<()> {
    let hash = content_hash(&record.text, &record.metadata);
    sqlx::query(
        r#"
        INSERT INTO records (id, text, metadata_json, embedding, model, dims, content_hash, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            text = excluded.text,
            metadata_json = excluded.metadata_json,
            embedding = excluded.embedding,
            model = excluded.model,
            dims = excluded.dims,
            content_hash = excluded.content_hash,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&record.id)
    .bind(&record.text)
    .bind(record.metadata.to_json_string())
    .bind(vec_to_blob(&record.embedding))
    .bind(model)
    .bind(record.embedding.len() as i64)
    .bind(&hash)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, records: &[DocumentRecord], model: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for record in records {
            write_record(&mut *tx, record, model, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, filter: &MetadataFilter) -> Result<ResultSet> {
        let rows = sqlx::query("SELECT id, text, metadata_json, embedding FROM records WHERE dims = ?")
            .bind(query.len() as i64)
            .fetch_all(&self.pool)
            .await?;

        let candidates = rows.iter().map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            Candidate {
                id: row.get("id"),
                text: row.get("text"),
                metadata: Metadata::from_json_str(&metadata_json),
                embedding: blob_to_vec(&blob),
            }
        });

        Ok(rank(candidates, query, k, filter))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn content_hashes(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT id, content_hash FROM records")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("content_hash")))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM records").execute(&self.pool).await?;
        Ok(())
    }

    async fn replace_all(&self, records: &[DocumentRecord], model: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM records").execute(&mut *tx).await?;
        for record in records {
            write_record(&mut *tx, record, model, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
