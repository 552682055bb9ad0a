//! HTTP API surface (spec §6).
//!
//! Kept close to the teacher's `server.rs`: `AppState` holding `Arc`
//! handles, a typed `AppError` implementing `IntoResponse` with the same
//! `{ "error": { "code", "message" } }` body shape, CORS via `tower_http`,
//! route handlers that validate then delegate to library functions. Routes
//! themselves are replaced with the sync/search/rag/health surface spec §6
//! describes.

use axum::extract::{FromRef, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::chat_client::HttpChatModel;
use crate::config::Config;
use crate::embedding_client::HttpEmbeddingModel;
use crate::extraction_client::ExtractionClient;
use crate::jobs::JobRegistry;
use crate::lake_client::LakeClient;
use crate::metadata_ingester::run_ingestion;
use crate::models::JobStatus;
use crate::queue::TransformationQueue;
use crate::rag::answer;
use crate::retrieval::semantic_search;
use crate::source_client::SourceClient;
use crate::worker_pool::WorkerPool;
use crate::{auth::AuthenticatedUser, discovery::discover};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub source: Arc<SourceClient>,
    pub lake: Arc<LakeClient>,
    pub extraction: Arc<ExtractionClient>,
    pub embedding_model: Arc<HttpEmbeddingModel>,
    pub chat_model: Arc<HttpChatModel>,
    pub queue: Arc<TransformationQueue>,
    pub jobs: Arc<JobRegistry>,
}

impl FromRef<AppState> for Arc<SourceClient> {
    fn from_ref(state: &AppState) -> Self {
        state.source.clone()
    }
}

/// Builds the router and spawns the transformation worker pool alongside
/// it. Returns the pool handle so callers (namely `serve`) can shut it down
/// gracefully on exit.
pub fn build_app(state: AppState) -> (Router, WorkerPool) {
    let worker_pool = WorkerPool::spawn(
        state.config.transform.worker_threads,
        state.source.clone(),
        state.lake.clone(),
        state.extraction.clone(),
        state.embedding_model.clone(),
        state.queue.clone(),
        state.config.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/sync/batch", post(handle_sync_batch))
        .route("/api/sync/configured", post(handle_sync_configured))
        .route("/api/sync/status", get(handle_sync_status_all))
        .route("/api/sync/status/{job_id}", get(handle_sync_status_one))
        .route("/api/sync/queue", delete(handle_clear_queue))
        .route("/api/search/semantic", post(handle_semantic_search))
        .route("/api/search/semantic/health", get(handle_simple_health))
        .route("/api/rag/prompt", post(handle_rag_prompt))
        .route("/api/rag/health", get(handle_simple_health))
        .route("/actuator/health", get(handle_actuator_health))
        .route("/actuator/info", get(handle_actuator_info))
        .layer(cors)
        .with_state(state);

    (app, worker_pool)
}

pub async fn run_server(config: Arc<Config>, state: AppState) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let (app, worker_pool) = build_app(state);

    tracing::info!(bind_addr = %bind_addr, "lakebridge server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    worker_pool.shutdown().await;
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

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail { code: self.code, message: self.message },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::BAD_REQUEST, code: "bad_request".to_string(), message: message.into() }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::NOT_FOUND, code: "not_found".to_string(), message: message.into() }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal".to_string(), message: message.into() }
}

fn from_lakebridge_error(e: crate::error::LakebridgeError) -> AppError {
    use crate::error::LakebridgeError::*;
    match e {
        PermissionDenied(msg) => AppError { status: StatusCode::FORBIDDEN, code: "permission_denied".to_string(), message: msg },
        NotFound(msg) => not_found(msg),
        AuthenticationFailed(msg) => AppError { status: StatusCode::UNAUTHORIZED, code: "authentication_failed".to_string(), message: msg },
        other => internal_error(other.to_string()),
    }
}

// ============ POST /api/sync/batch ============

#[derive(Deserialize)]
struct SyncBatchRequest {
    #[serde(default)]
    full: bool,
}

#[derive(Serialize)]
struct SyncBatchResponse {
    job_id: Uuid,
    discovered: u64,
    ingested: u64,
    failed: u64,
}

async fn handle_sync_batch(
    State(state): State<AppState>,
    Json(_req): Json<SyncBatchRequest>,
) -> Result<Json<SyncBatchResponse>, AppError> {
    run_sync(&state).await
}

async fn handle_sync_configured(State(state): State<AppState>) -> Result<Json<SyncBatchResponse>, AppError> {
    run_sync(&state).await
}

async fn run_sync(state: &AppState) -> Result<Json<SyncBatchResponse>, AppError> {
    let job_id = state.jobs.start_job();

    let repository_id = state.source.repository_id().await.map_err(from_lakebridge_error)?;
    let stream = discover(&state.source, &state.config);
    tokio::pin!(stream);

    let summary = run_ingestion(
        &state.source,
        &state.lake,
        &state.queue,
        &state.jobs,
        job_id,
        &repository_id,
        stream,
    )
    .await;

    let status = if summary.failed == 0 { JobStatus::Completed } else { JobStatus::Failed };
    state.jobs.complete(job_id, status);

    Ok(Json(SyncBatchResponse {
        job_id,
        discovered: summary.discovered,
        ingested: summary.ingested,
        failed: summary.failed,
    }))
}

// ============ GET /api/sync/status[/{jobId}] ============

async fn handle_sync_status_all(State(state): State<AppState>) -> Json<Vec<crate::models::IngestionJob>> {
    Json(state.jobs.list())
}

async fn handle_sync_status_one(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<crate::models::IngestionJob>, AppError> {
    state
        .jobs
        .get(job_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("job {job_id} not found")))
}

// ============ DELETE /api/sync/queue ============

#[derive(Serialize)]
struct ClearQueueResponse {
    drained: u64,
}

async fn handle_clear_queue(State(state): State<AppState>) -> Json<ClearQueueResponse> {
    let drained = state.queue.clear().await;
    Json(ClearQueueResponse { drained })
}

// ============ POST /api/search/semantic ============

#[derive(Deserialize)]
struct SemanticSearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    min_score: Option<f64>,
}

#[derive(Serialize)]
struct SemanticSearchResponse {
    results: Vec<crate::retrieval::SearchResultItem>,
    model: String,
    vector_dimension: usize,
    total_count: usize,
    elapsed_ms: u64,
}

async fn handle_semantic_search(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<SemanticSearchRequest>,
) -> Result<Json<SemanticSearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let top_k = req.top_k.unwrap_or(state.config.rag.default_top_k);

    let result = semantic_search(
        &state.source,
        &state.lake,
        &state.embedding_model,
        &state.config.semantic_search,
        &user.username,
        &req.query,
        top_k,
        req.min_score,
    )
    .await
    .map_err(from_lakebridge_error)?;

    Ok(Json(SemanticSearchResponse {
        results: result.items,
        model: result.model_name,
        vector_dimension: result.vector_dimension,
        total_count: result.total_count,
        elapsed_ms: result.elapsed_ms,
    }))
}

// ============ POST /api/rag/prompt ============

#[derive(Deserialize)]
struct RagPromptRequest {
    question: String,
    #[serde(default)]
    include_context: bool,
}

async fn handle_rag_prompt(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<RagPromptRequest>,
) -> Result<Json<crate::rag::RagResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let response = answer(
        &state.source,
        &state.lake,
        &state.embedding_model,
        &state.chat_model,
        &state.config.rag,
        &user.username,
        &req.question,
        req.include_context,
    )
    .await
    .map_err(from_lakebridge_error)?;

    Ok(Json(response))
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn handle_simple_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string() })
}

#[derive(Serialize)]
struct ActuatorHealthResponse {
    status: String,
}

async fn handle_actuator_health() -> Json<ActuatorHealthResponse> {
    Json(ActuatorHealthResponse { status: "UP".to_string() })
}

#[derive(Serialize)]
struct ActuatorInfoResponse {
    name: &'static str,
    version: &'static str,
}

async fn handle_actuator_info() -> Json<ActuatorInfoResponse> {
    Json(ActuatorInfoResponse { name: "lakebridge", version: env!("CARGO_PKG_VERSION") })
}
