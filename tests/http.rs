//! HTTP API tests against the real router on an ephemeral port.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use volley_rag::classifier::QueryClassifier;
use volley_rag::embedding::EmbeddingProvider;
use volley_rag::generation::DisabledGenerator;
use volley_rag::models::{DocKind, DocumentRecord, Metadata, ResultSet};
use volley_rag::pipeline::{AskSettings, RagService};
use volley_rag::retriever::{OverFetch, Retriever};
use volley_rag::server::{build_router, AppState};
use volley_rag::store::{InMemoryIndex, MetadataFilter, VectorIndex};

struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.6, 0.8]).collect())
    }
}

/// An index whose backing store is unreachable.
struct OfflineIndex;

#[async_trait]
impl VectorIndex for OfflineIndex {
    async fn upsert(&self, _: &[DocumentRecord], _: &str) -> Result<()> {
        anyhow::bail!("database is locked")
    }
    async fn search(&self, _: &[f32], _: usize, _: &MetadataFilter) -> Result<ResultSet> {
        anyhow::bail!("database is locked")
    }
    async fn count(&self) -> Result<usize> {
        anyhow::bail!("database is locked")
    }
    async fn content_hashes(&self) -> Result<HashMap<String, String>> {
        anyhow::bail!("database is locked")
    }
    async fn clear(&self) -> Result<()> {
        anyhow::bail!("database is locked")
    }
    async fn replace_all(&self, _: &[DocumentRecord], _: &str) -> Result<()> {
        anyhow::bail!("database is locked")
    }
}

fn record(id: &str, kind: DocKind, date: &str, team: &str) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        text: format!("{} record for {} on {}", kind, team, date),
        embedding: vec![0.6, 0.8],
        metadata: Metadata::new()
            .with("type", kind.as_str())
            .with("match_id", id)
            .with("date", date)
            .with("rm_team", team)
            .with("league", "Serie D F"),
    }
}

async fn spawn_server() -> String {
    let index = InMemoryIndex::with_records(vec![
        record("m1", DocKind::Match, "10/01/2026 18:00", "RM VOLLEY #02"),
        record("m2", DocKind::Match, "24/01/2026 18:00", "RM VOLLEY #02"),
        record("s1", DocKind::Standing, "", "RM VOLLEY #02"),
    ])
    .await
    .unwrap();
    spawn_server_over(Arc::new(index)).await
}

async fn spawn_server_over(index: Arc<dyn VectorIndex>) -> String {
    let now = NaiveDateTime::parse_from_str("15/01/2026 12:00", "%d/%m/%Y %H:%M").unwrap();
    let retriever = Retriever::new(Arc::new(FixedEmbedder), index, OverFetch::default())
        .with_now(now);
    let service = RagService::new(
        retriever,
        QueryClassifier::default(),
        Arc::new(DisabledGenerator),
        AskSettings::default(),
    );
    let app = build_router(AppState::new(Arc::new(service), Duration::from_secs(5)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn health_reports_index_size_and_version() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["database_count"], 3);
    assert_eq!(body["generator_available"], false);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn search_returns_hits_with_distance() {
    let base = spawn_server().await;
    let resp = reqwest::get(format!("{}/search?query=risultati&filter_type=match", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 2);
    let results = body["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["metadata"]["type"] == "match"));
    assert!(results[0]["distance"].as_f64().unwrap() < 1e-4);
}

#[tokio::test]
async fn search_rejects_out_of_range_n_results() {
    let base = spawn_server().await;
    let resp = reqwest::get(format!("{}/search?query=x&n_results=0", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn ask_with_generation_disabled_is_a_client_error() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .json(&serde_json::json!({"question": "Risultati di RM VOLLEY #02"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "generation_disabled");
}

#[tokio::test]
async fn ask_rejects_malformed_body() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .header("content-type", "application/json")
        .body("{\"n_results\": 3}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn team_endpoint_applies_scope() {
    let base = spawn_server().await;
    let url = format!("{}/team/RM%20VOLLEY%20%2302?scope=upcoming", base);
    let body: Value = reqwest::get(url).await.unwrap().json().await.unwrap();

    assert_eq!(body["team"], "RM VOLLEY #02");
    assert_eq!(body["count"], 1);
    assert_eq!(body["metadatas"][0]["match_id"], "m2");
}

#[tokio::test]
async fn team_endpoint_rejects_unknown_scope() {
    let base = spawn_server().await;
    let resp = reqwest::get(format!("{}/team/RM%20VOLLEY%20%2302?scope=soon", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let base = spawn_server().await;
    let resp = reqwest::get(format!("{}/players", base)).await.unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn stats_reports_index_failure_as_unavailable() {
    let base = spawn_server_over(Arc::new(OfflineIndex)).await;
    let resp = reqwest::get(format!("{}/stats", base)).await.unwrap();
    assert_eq!(resp.status(), 503);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "retrieval_unavailable");
}

#[tokio::test]
async fn search_reports_index_failure_as_unavailable() {
    let base = spawn_server_over(Arc::new(OfflineIndex)).await;
    let resp = reqwest::get(format!("{}/search?query=risultati", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}
