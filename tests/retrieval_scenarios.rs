//! End-to-end question flows over an in-memory index with a pinned clock.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use volley_rag::classifier::QueryClassifier;
use volley_rag::embedding::EmbeddingProvider;
use volley_rag::error::{AskError, RetrievalError};
use volley_rag::generation::{AnswerGenerator, DisabledGenerator};
use volley_rag::models::{DocKind, DocumentRecord, Metadata};
use volley_rag::pipeline::{AskRequest, AskSettings, RagService, RetrievalPlan};
use volley_rag::retriever::{OverFetch, Retriever};
use volley_rag::store::InMemoryIndex;

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
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

/// Echoes how much context it was handed.
struct EchoGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl AnswerGenerator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        question: &str,
        context: &str,
        _temperature: f32,
        _max_output_tokens: u32,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} ({} context chars)", question, context.len()))
    }
}

fn match_record(id: &str, team: &str, date: &str, result: Option<&str>) -> DocumentRecord {
    let mut metadata = Metadata::new()
        .with("type", DocKind::Match.as_str())
        .with("match_id", id)
        .with("date", date)
        .with("rm_team", team)
        .with("league", "Under 16 F");
    if let Some(r) = result {
        metadata.insert("result", r);
    }
    DocumentRecord {
        id: format!("match_{}", id),
        text: format!("Match {} of {} on {}", id, team, date),
        embedding: vec![1.0, 0.0],
        metadata,
    }
}

fn standing_record() -> DocumentRecord {
    DocumentRecord {
        id: "standing_under_16_f".to_string(),
        text: "What are the Under 16 F standings? 1. RM VOLLEY #18 - 9 points".to_string(),
        embedding: vec![1.0, 0.0],
        metadata: Metadata::new()
            .with("type", DocKind::Standing.as_str())
            .with("league", "Under 16 F"),
    }
}

fn pinned_now() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("15/01/2026 12:00", "%d/%m/%Y %H:%M").unwrap()
}

fn fixture() -> Vec<DocumentRecord> {
    vec![
        match_record("1", "RM VOLLEY #18", "20/12/2025 18:00", Some("3-0")),
        match_record("2", "RM VOLLEY #18", "10/01/2026 18:00", Some("3-1")),
        match_record("3", "RM VOLLEY #18", "03/01/2026 18:00", Some("1-3")),
        match_record("4", "RM VOLLEY #18", "24/01/2026 18:00", None),
        match_record("5", "RM VOLLEY #18", "17/01/2026 18:00", None),
        match_record("6", "RM VOLLEY #02", "11/01/2026 20:30", Some("3-2")),
        match_record("7", "RM VOLLEY #02", "18/01/2026 20:30", None),
        standing_record(),
    ]
}

async fn service_over(records: Vec<DocumentRecord>, generator: Arc<dyn AnswerGenerator>) -> RagService {
    let index = InMemoryIndex::with_records(records).await.unwrap();
    let retriever = Retriever::new(Arc::new(FixedEmbedder), Arc::new(index), OverFetch::default())
        .with_now(pinned_now());
    RagService::new(
        retriever,
        QueryClassifier::default(),
        generator,
        AskSettings::default(),
    )
}

async fn service_with(generator: Arc<dyn AnswerGenerator>) -> RagService {
    service_over(fixture(), generator).await
}

async fn service() -> RagService {
    service_with(Arc::new(DisabledGenerator)).await
}

fn match_ids(ids: Vec<&str>) -> Vec<String> {
    ids.into_iter().map(str::to_string).collect()
}

#[tokio::test]
async fn past_question_returns_played_matches_most_recent_first() {
    let service = service().await;
    let mut request = AskRequest::new("Come è andata l'ultima partita di RM VOLLEY #18?");
    request.n_results = Some(3);

    let prepared = service.prepare(&request).await.unwrap();

    assert!(matches!(prepared.plan, RetrievalPlan::TeamPlayed { k: 3, .. }));
    assert_eq!(
        match_ids(prepared.results.ids()),
        vec!["match_2", "match_3", "match_1"]
    );
    assert!(prepared.context.starts_with("[Match 1]"));
}

#[tokio::test]
async fn future_singular_question_returns_only_the_next_fixture() {
    let service = service().await;
    let request = AskRequest::new("Quando gioca la prossima partita RM VOLLEY #18?");

    let prepared = service.prepare(&request).await.unwrap();

    assert!(matches!(prepared.plan, RetrievalPlan::TeamUpcoming { k: 1, .. }));
    assert_eq!(match_ids(prepared.results.ids()), vec!["match_5"]);
}

#[tokio::test]
async fn english_past_question_excludes_upcoming_fixtures() {
    let service = service().await;
    let request = AskRequest::new("how did RM VOLLEY #18 play last match");

    let prepared = service.prepare(&request).await.unwrap();

    assert!(matches!(prepared.plan, RetrievalPlan::TeamPlayed { k: 10, .. }));
    assert_eq!(
        match_ids(prepared.results.ids()),
        vec!["match_2", "match_3", "match_1"]
    );
    for meta in prepared.results.metadatas() {
        assert!(meta.get_str("result").is_some());
    }
}

#[tokio::test]
async fn english_next_match_question_returns_only_the_soonest_of_many() {
    let mut records = fixture();
    records.push(match_record("8", "RM VOLLEY #18", "31/01/2026 18:00", None));
    records.push(match_record("9", "RM VOLLEY #18", "07/02/2026 18:00", None));
    let service = service_over(records, Arc::new(DisabledGenerator)).await;

    let upcoming = service
        .retriever()
        .retrieve_by_team("RM VOLLEY #18", 10, false, true)
        .await
        .unwrap();
    assert_eq!(upcoming.len(), 4);

    let request = AskRequest::new("when is the next match of RM VOLLEY #18");
    let prepared = service.prepare(&request).await.unwrap();

    assert!(matches!(prepared.plan, RetrievalPlan::TeamUpcoming { k: 1, .. }));
    assert_eq!(match_ids(prepared.results.ids()), vec!["match_5"]);
}

#[tokio::test]
async fn future_plural_question_returns_fixtures_soonest_first() {
    let service = service().await;
    let request = AskRequest::new("What are the next matches of RM VOLLEY #18?");

    let prepared = service.prepare(&request).await.unwrap();

    assert!(matches!(prepared.plan, RetrievalPlan::TeamUpcoming { k: 10, .. }));
    assert_eq!(
        match_ids(prepared.results.ids()),
        vec!["match_5", "match_4"]
    );
}

#[tokio::test]
async fn team_retrieval_never_mixes_teams() {
    let service = service().await;
    let request = AskRequest::new("Risultati recenti di RM VOLLEY #02");

    let prepared = service.prepare(&request).await.unwrap();

    assert_eq!(match_ids(prepared.results.ids()), vec!["match_6"]);
    for meta in prepared.results.metadatas() {
        assert_eq!(meta.get_str("rm_team"), Some("RM VOLLEY #02"));
    }
}

#[tokio::test]
async fn question_without_team_falls_back_to_semantic_search() {
    let service = service().await;
    let mut request = AskRequest::new("show me standings");
    request.n_results = Some(20);

    let prepared = service.prepare(&request).await.unwrap();

    assert!(prepared.classification.entity.is_none());
    assert!(matches!(prepared.plan, RetrievalPlan::Semantic { k: 20, .. }));
    assert_eq!(prepared.results.len(), fixture().len());
}

#[tokio::test]
async fn request_filter_type_restricts_semantic_search() {
    let service = service().await;
    let mut request = AskRequest::new("show me standings");
    request.filter_type = Some(DocKind::Standing);

    let prepared = service.prepare(&request).await.unwrap();

    assert_eq!(match_ids(prepared.results.ids()), vec!["standing_under_16_f"]);
    assert!(prepared.context.starts_with("[Standing 1]"));
}

#[tokio::test]
async fn unknown_team_yields_empty_context() {
    let service = service().await;
    let request = AskRequest::new("Ultimi risultati di RM VOLLEY #99");

    let prepared = service.prepare(&request).await.unwrap();

    assert!(prepared.results.is_empty());
    assert_eq!(prepared.context, "");
}

#[tokio::test]
async fn conflicting_temporal_flags_are_rejected() {
    let service = service().await;
    let err = service
        .retriever()
        .retrieve_by_team("RM VOLLEY #18", 5, true, true)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::ConflictingTemporalScope));
}

#[tokio::test]
async fn out_of_range_n_results_is_rejected() {
    let service = service().await;
    let mut request = AskRequest::new("show me standings");
    request.n_results = Some(21);

    let err = service.prepare(&request).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidRequest(_)));
}

#[tokio::test]
async fn ask_with_disabled_generator_is_rejected() {
    let service = service().await;
    let err = service
        .ask(&AskRequest::new("Risultati di RM VOLLEY #18"))
        .await
        .unwrap_err();
    assert!(matches!(err, AskError::GenerationDisabled));
}

#[tokio::test]
async fn ask_returns_answer_sources_and_context() {
    let generator = Arc::new(EchoGenerator {
        calls: AtomicUsize::new(0),
    });
    let service = service_with(generator.clone()).await;

    let response = service
        .ask(&AskRequest::new("Quando gioca la prossima partita RM VOLLEY #18?"))
        .await
        .unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].get_str("match_id"), Some("5"));
    assert!(response.context_used.contains("Match 5 of RM VOLLEY #18"));
    assert!(response.answer.contains("context chars"));
}

#[tokio::test]
async fn ask_rejects_temperature_out_of_range() {
    let generator = Arc::new(EchoGenerator {
        calls: AtomicUsize::new(0),
    });
    let service = service_with(generator.clone()).await;
    let mut request = AskRequest::new("show me standings");
    request.temperature = Some(1.5);

    let err = service.ask(&request).await.unwrap_err();
    assert!(matches!(
        err,
        AskError::Retrieval(RetrievalError::InvalidRequest(_))
    ));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}
