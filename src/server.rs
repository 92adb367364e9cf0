//! HTTP API.
//!
//! Thin adapters over [`RagService`]: each handler validates its parameters,
//! runs one pipeline call under the configured request timeout, and shapes
//! the JSON response. The service is built once at startup and shared by all
//! requests.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service info and endpoint list |
//! | `GET`  | `/health` | Index size, generator reachability, version |
//! | `POST` | `/ask` | Full question answering |
//! | `GET`  | `/search` | Raw semantic search |
//! | `GET`  | `/stats` | Index and model details |
//! | `GET`  | `/matches` | Search restricted to matches |
//! | `GET`  | `/standings` | Search restricted to standings |
//! | `GET`  | `/team/{name}` | Date-ordered matches of one team |
//! | `GET`  | `/league/{name}` | Records of one league |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `generation_disabled` (400),
//! `timeout` (408), `retrieval_unavailable` (503), `generation_failed` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{AskError, RetrievalError};
use crate::models::{DocKind, ResultSet};
use crate::pipeline::{AskRequest, AskResponse, RagService};
use crate::retriever::TemporalScope;
use crate::store::MetadataFilter;

/// Upper bound on `n_results` for the convenience endpoints.
const MAX_BROWSE_RESULTS: usize = 50;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    service: Arc<RagService>,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<RagService>, request_timeout: Duration) -> Self {
        Self {
            service,
            request_timeout,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/search", get(handle_search))
        .route("/stats", get(handle_stats))
        .route("/matches", get(handle_matches))
        .route("/standings", get(handle_standings))
        .route("/team/{name}", get(handle_team))
        .route("/league/{name}", get(handle_league))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(RagService::from_config(config).await?);
    let state = AppState::new(
        service,
        Duration::from_secs(config.server.request_timeout_secs),
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("vrag server listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn timeout_error(message: impl Into<String>) -> AppError {
    app_error(StatusCode::REQUEST_TIMEOUT, "timeout", message)
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        if err.is_service_failure() {
            error!(error = %err, "retrieval failed");
            app_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "retrieval_unavailable",
                err.to_string(),
            )
        } else {
            bad_request(err.to_string())
        }
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::Retrieval(e) => e.into(),
            AskError::GenerationDisabled => app_error(
                StatusCode::BAD_REQUEST,
                "generation_disabled",
                err.to_string(),
            ),
            AskError::Generation(_) => {
                app_error(StatusCode::BAD_GATEWAY, "generation_failed", err.to_string())
            }
        }
    }
}

/// Run `fut` under the request timeout. Dropping the future on expiry is
/// safe: the read path has nothing to undo.
async fn timed<T, E>(limit: Duration, fut: impl Future<Output = Result<T, E>>) -> Result<T, AppError>
where
    E: Into<AppError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(timeout_error(format!(
            "request did not complete within {}s",
            limit.as_secs()
        ))),
    }
}

fn parse_filter_type(raw: Option<&str>) -> Result<Option<DocKind>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.parse().map(Some).map_err(bad_request),
        None => Ok(None),
    }
}

fn check_browse_limit(n: usize) -> Result<usize, AppError> {
    if n == 0 || n > MAX_BROWSE_RESULTS {
        return Err(bad_request(format!(
            "n_results must be between 1 and {}",
            MAX_BROWSE_RESULTS
        )));
    }
    Ok(n)
}

fn require_query(query: &str) -> Result<(), AppError> {
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    Ok(())
}

// ============ GET / ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "name": "vrag",
        "description": "Question answering over volleyball matches and league standings",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "ask": "POST /ask",
            "search": "GET /search?query=...",
            "stats": "GET /stats",
            "matches": "GET /matches?query=...",
            "standings": "GET /standings?query=...",
            "team": "GET /team/{name}",
            "league": "GET /league/{name}",
            "health": "GET /health"
        }
    }))
}

async fn handle_not_found() -> AppError {
    not_found("no such endpoint")
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    database_count: usize,
    generator_available: bool,
    model: String,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let count = state.service.retriever().count().await;
    let generator = state.service.generator();
    let generator_available = generator.is_available().await;

    Json(HealthResponse {
        status: if count.is_ok() { "ok" } else { "degraded" }.to_string(),
        database_count: count.unwrap_or(0),
        generator_available,
        model: generator.model_name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ask ============

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    let response = timed(state.request_timeout, state.service.ask(&request)).await?;
    Ok(Json(response))
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default = "default_search_results")]
    n_results: usize,
    #[serde(default)]
    filter_type: Option<String>,
}

fn default_search_results() -> usize {
    5
}

#[derive(Serialize)]
struct SearchHit {
    document: String,
    metadata: Value,
    distance: f32,
    id: String,
}

fn hits(results: ResultSet) -> Vec<SearchHit> {
    results
        .items
        .into_iter()
        .map(|item| SearchHit {
            document: item.document,
            metadata: Value::Object(item.metadata.as_map().clone()),
            distance: item.distance,
            id: item.id,
        })
        .collect()
}

async fn handle_search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    require_query(&params.query)?;
    let k = state.service.resolve_n_results(Some(params.n_results))?;
    let filter = parse_filter_type(params.filter_type.as_deref())?
        .map(MetadataFilter::kind)
        .unwrap_or_default();

    let results = timed(
        state.request_timeout,
        state.service.retriever().retrieve(&params.query, k, &filter),
    )
    .await?;

    let results = hits(results);
    Ok(Json(json!({
        "query": params.query,
        "count": results.len(),
        "results": results,
    })))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let service = &state.service;
    let count = timed(state.request_timeout, service.retriever().count()).await?;
    let embedder = service.retriever().embedder();
    let generator = service.generator();
    let settings = service.settings();

    Ok(Json(json!({
        "database": {
            "document_count": count,
            "embedding_model": embedder.model_name(),
            "embedding_dimension": embedder.dims(),
        },
        "llm": {
            "model": generator.model_name(),
            "enabled": generator.is_enabled(),
            "available": generator.is_available().await,
        },
        "retrieval": {
            "default_n_results": settings.default_n_results,
            "max_n_results": settings.max_n_results,
            "context_max_chars": settings.context_max_chars,
        }
    })))
}

// ============ GET /matches, GET /standings ============

#[derive(Deserialize)]
struct BrowseParams {
    query: String,
    #[serde(default = "default_browse_results")]
    n_results: usize,
}

fn default_browse_results() -> usize {
    10
}

async fn handle_matches(
    State(state): State<AppState>,
    params: Result<Query<BrowseParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    require_query(&params.query)?;
    let k = check_browse_limit(params.n_results)?;

    let results = timed(
        state.request_timeout,
        state.service.retriever().retrieve_matches(&params.query, k),
    )
    .await?;

    let matches: Vec<Value> = results
        .items
        .iter()
        .map(|item| {
            let m = &item.metadata;
            json!({
                "text": item.document,
                "match_id": m.get("match_id"),
                "date": m.get("date"),
                "home_team": m.get("home_team"),
                "away_team": m.get("away_team"),
                "result": m.get("result"),
                "league": m.get("league"),
            })
        })
        .collect();

    Ok(Json(json!({
        "query": params.query,
        "count": matches.len(),
        "matches": matches,
    })))
}

async fn handle_standings(
    State(state): State<AppState>,
    params: Result<Query<BrowseParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    require_query(&params.query)?;
    let k = check_browse_limit(params.n_results)?;

    let results = timed(
        state.request_timeout,
        state.service.retriever().retrieve_standings(&params.query, k),
    )
    .await?;

    let standings: Vec<Value> = results
        .items
        .iter()
        .map(|item| {
            let m = &item.metadata;
            json!({
                "text": item.document,
                "league": m.get("league"),
                "team": m.get("team"),
                "leader": m.get("leader"),
                "position": m.get("position"),
                "points": m.get("points"),
                "wins": m.get("wins"),
                "losses": m.get("losses"),
            })
        })
        .collect();

    Ok(Json(json!({
        "query": params.query,
        "count": standings.len(),
        "standings": standings,
    })))
}

// ============ GET /team/{name}, GET /league/{name} ============

#[derive(Deserialize)]
struct TeamParams {
    #[serde(default = "default_browse_results")]
    n_results: usize,
    #[serde(default)]
    scope: Option<String>,
}

fn parse_scope(raw: Option<&str>) -> Result<TemporalScope, AppError> {
    match raw.map(str::trim).unwrap_or("all") {
        "" | "all" => Ok(TemporalScope::Any),
        "played" => Ok(TemporalScope::Played),
        "upcoming" => Ok(TemporalScope::Upcoming),
        other => Err(bad_request(format!(
            "invalid scope '{}': expected all, played, or upcoming",
            other
        ))),
    }
}

fn documents_response(key: &str, name: &str, results: &ResultSet) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(key.to_string(), Value::from(name));
    body.insert("documents".to_string(), json!(results.documents()));
    body.insert("metadatas".to_string(), json!(results.metadatas()));
    body.insert("count".to_string(), Value::from(results.len()));
    Value::Object(body)
}

async fn handle_team(
    State(state): State<AppState>,
    Path(name): Path<String>,
    params: Result<Query<TeamParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let k = check_browse_limit(params.n_results)?;
    let scope = parse_scope(params.scope.as_deref())?;

    let results = timed(
        state.request_timeout,
        state.service.retriever().retrieve_team(&name, k, scope),
    )
    .await?;

    Ok(Json(documents_response("team", &name, &results)))
}

#[derive(Deserialize)]
struct LeagueParams {
    #[serde(default = "default_browse_results")]
    n_results: usize,
}

async fn handle_league(
    State(state): State<AppState>,
    Path(name): Path<String>,
    params: Result<Query<LeagueParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let k = check_browse_limit(params.n_results)?;

    let results = timed(
        state.request_timeout,
        state.service.retriever().retrieve_by_league(&name, k),
    )
    .await?;

    Ok(Json(documents_response("league", &name, &results)))
}
