// src/api.rs
//! Read-mostly HTTP API over the stored notes, plus job control.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::db::models::{
    DataSource, JobExecution, NoteFilter, NoteStatus, ProcessedSummary, ProcessingLog,
    TechnicalNote,
};
use crate::error::DigestError;
use crate::jobs::{data_source_status, AppContext, JobManager, JobStatus, SourceStatus};
use crate::metrics::Metrics;
use crate::processor::{processing_stats, ProcessingStats};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub ctx: AppContext,
    /// Absent when the server runs without a scheduler.
    pub jobs: Option<Arc<JobManager>>,
}

impl AppState {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx, jobs: None }
    }

    pub fn with_jobs(mut self, jobs: Arc<JobManager>) -> Self {
        self.jobs = Some(jobs);
        self
    }
}

/// Library errors mapped onto HTTP statuses.
pub struct ApiError(DigestError);

impl From<DigestError> for ApiError {
    fn from(e: DigestError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DigestError::NotFound(_) => StatusCode::NOT_FOUND,
            DigestError::Validation(_) => StatusCode::BAD_REQUEST,
            DigestError::Job { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/sources", get(list_sources))
        .route("/sources/{name}/status", get(source_status))
        .route("/notes", get(list_notes))
        .route("/notes/{id}", get(get_note))
        .route("/notes/{id}/summary", get(get_summary))
        .route("/notes/{id}/logs", get(get_logs))
        .route("/stats", get(stats))
        .route("/jobs", get(list_jobs))
        .route("/jobs/history", get(job_history))
        .route("/jobs/{id}/run", post(run_job))
        .route("/jobs/{id}/pause", post(pause_job))
        .route("/jobs/{id}/resume", post(resume_job))
        .with_state(state);

    let app = match metrics {
        Some(m) => api.merge(m.router()),
        None => api,
    };
    app.layer(CorsLayer::very_permissive())
}

async fn health(State(state): State<AppState>) -> Response {
    match crate::db::ping(&state.ctx.pool).await {
        Ok(()) => Json(json!({
            "status": "ok",
            "database": "ok",
            "summarizer": state.ctx.summarizer.model_name(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": e.to_string() })),
        )
            .into_response(),
    }
}

async fn list_sources(State(state): State<AppState>) -> ApiResult<Vec<DataSource>> {
    Ok(Json(DataSource::list(&state.ctx.pool).await?))
}

async fn source_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<SourceStatus> {
    Ok(Json(data_source_status(&state.ctx.pool, &name).await?))
}

#[derive(Debug, Deserialize)]
struct NotesQuery {
    status: Option<String>,
    source_id: Option<i64>,
    limit: Option<i64>,
}

async fn list_notes(
    State(state): State<AppState>,
    Query(q): Query<NotesQuery>,
) -> ApiResult<Vec<TechnicalNote>> {
    let status = q
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<NoteStatus>)
        .transpose()?;
    let filter = NoteFilter {
        source_id: q.source_id,
        status,
        limit: Some(q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)),
    };
    Ok(Json(TechnicalNote::list(&state.ctx.pool, &filter).await?))
}

async fn get_note(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<TechnicalNote> {
    let note = TechnicalNote::find_by_id(&state.ctx.pool, id)
        .await?
        .ok_or_else(|| DigestError::NotFound(format!("technical note {id}")))?;
    Ok(Json(note))
}

async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ProcessedSummary> {
    let summary = ProcessedSummary::find_by_note(&state.ctx.pool, id)
        .await?
        .ok_or_else(|| DigestError::NotFound(format!("summary for technical note {id}")))?;
    Ok(Json(summary))
}

async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<ProcessingLog>> {
    if TechnicalNote::find_by_id(&state.ctx.pool, id).await?.is_none() {
        return Err(DigestError::NotFound(format!("technical note {id}")).into());
    }
    Ok(Json(ProcessingLog::list_for_note(&state.ctx.pool, id).await?))
}

async fn stats(State(state): State<AppState>) -> ApiResult<ProcessingStats> {
    Ok(Json(processing_stats(&state.ctx.pool).await?))
}

async fn list_jobs(State(state): State<AppState>) -> Json<JobStatus> {
    match &state.jobs {
        Some(jobs) => Json(jobs.job_status().await),
        None => Json(JobStatus {
            jobs: Vec::new(),
            scheduler_running: false,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    job_id: Option<String>,
    limit: Option<i64>,
}

async fn job_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Vec<JobExecution>> {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    Ok(Json(
        JobExecution::recent(&state.ctx.pool, q.job_id.as_deref(), limit).await?,
    ))
}

fn manager(state: &AppState) -> Result<&JobManager, ApiError> {
    state
        .jobs
        .as_deref()
        .ok_or_else(|| DigestError::Validation("scheduler is not running".into()).into())
}

async fn run_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    manager(&state)?.trigger_job(&id).await?;
    Ok(accepted(&id, "queued"))
}

async fn pause_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    manager(&state)?.pause_job(&id).await?;
    Ok(accepted(&id, "paused"))
}

async fn resume_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    manager(&state)?.resume_job(&id).await?;
    Ok(accepted(&id, "resumed"))
}

fn accepted(job_id: &str, action: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "job_id": job_id, "action": action })),
    )
        .into_response()
}
