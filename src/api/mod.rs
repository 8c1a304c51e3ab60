use axum::Json;
use axum::extract::{Path, Query};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::canvas::{Credentials, normalize_base_url};
use crate::config::AuthStrategyKind;
use crate::db::repository;
use crate::error::AppError;
use crate::models::*;
use crate::services::{self, AccountStats, JobHandle};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ConnectRequest {
    pub account_id: String,
    pub base_url: String,
    pub credentials: Credentials,
}

#[derive(Deserialize)]
struct AssignmentQueryParams {
    #[serde(default)]
    pending: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/connect", post(connect))
        .route("/jobs/{job_id}", get(get_job))
        .route("/accounts/{account_id}/resync", post(resync))
        .route("/accounts/{account_id}/sync", post(sync_now))
        .route("/accounts/{account_id}/status", get(status))
        .route("/accounts/{account_id}/courses", get(list_courses))
        .route("/accounts/{account_id}/assignments", get(list_assignments))
        .route("/accounts/{account_id}/announcements", get(list_announcements))
        .route("/accounts/{account_id}/stats", get(stats))
        .route("/accounts/{account_id}/context", get(context))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

fn validate_connect(req: &ConnectRequest, expected: AuthStrategyKind) -> Result<String, AppError> {
    if req.account_id.trim().is_empty() {
        return Err(AppError::Validation("account_id is required".to_string()));
    }
    req.credentials.validate().map_err(AppError::Validation)?;
    if req.credentials.kind() != expected {
        let expected = match expected {
            AuthStrategyKind::AccessToken => "access_token",
            AuthStrategyKind::Password => "password",
        };
        return Err(AppError::Validation(format!(
            "this server expects {} credentials",
            expected
        )));
    }
    normalize_base_url(&req.base_url).map_err(|e| AppError::Validation(e.to_string()))
}

async fn connect(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> Result<(StatusCode, Json<JobHandle>), AppError> {
    let base_url = validate_connect(&req, state.auth_strategy)?;
    let account_id = req.account_id.trim();
    info!("connect requested for account {} at {}", account_id, base_url);
    let handle = state.jobs.start_connect(account_id, &base_url, req.credentials);
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

async fn resync(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<(StatusCode, Json<JobHandle>), AppError> {
    let handle = state.jobs.start_resync(&account_id).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<SyncJob>, AppError> {
    let job = state.jobs.job(job_id).ok_or(AppError::NotFound)?;
    Ok(Json(job))
}

async fn sync_now(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<SyncSummary>, AppError> {
    let summary = state.jobs.sync_now(&account_id).await?;
    Ok(Json(summary))
}

async fn status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ConnectionStatus>, AppError> {
    let status = repository::connection_status(&state.db, &account_id).await?;
    Ok(Json(status))
}

async fn list_courses(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<Course>>, AppError> {
    let courses = repository::fetch_courses(&state.db, &account_id).await?;
    Ok(Json(courses))
}

async fn list_assignments(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Query(params): Query<AssignmentQueryParams>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    let assignments = repository::fetch_assignments(&state.db, &account_id).await?;
    let assignments = if params.pending {
        services::context::pending_assignments(&assignments)
            .into_iter()
            .cloned()
            .collect()
    } else {
        assignments
    };
    Ok(Json(assignments))
}

async fn list_announcements(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<Announcement>>, AppError> {
    let announcements = repository::fetch_announcements(&state.db, &account_id).await?;
    Ok(Json(announcements))
}

async fn stats(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountStats>, AppError> {
    let stats = services::build_stats(&state.db, &account_id, Utc::now()).await?;
    Ok(Json(stats))
}

async fn context(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let text = services::build_context(&state.db, &account_id).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}
