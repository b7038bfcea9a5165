use super::state::AppState;
use crate::store::{SessionStatus, StoreError};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    /// Case or course the recording belongs to
    pub owner_id: String,

    /// Human-readable label
    pub name: String,

    /// Encoding of the chunks that will follow (e.g., "audio/webm")
    pub mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: SessionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupParams {
    /// Overrides the configured max age
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub total_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn storage_unavailable(context: &str, e: StoreError) -> Response {
    error!("{}: {}", context, e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: format!("{context}: {e}"),
        }),
    )
        .into_response()
}

fn session_not_found(session_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Recording {} not found", session_id),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recordings
/// Start a new recording session
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    match state
        .store
        .start_session(&req.owner_id, &req.name, &req.mime_type)
        .await
    {
        Ok(session_id) => (
            StatusCode::CREATED,
            Json(StartSessionResponse { session_id }),
        )
            .into_response(),
        Err(e) => storage_unavailable("Failed to start recording", e),
    }
}

/// GET /recordings
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_sessions().await {
        Ok(sessions) => (StatusCode::OK, Json(sessions)).into_response(),
        Err(e) => storage_unavailable("Failed to list recordings", e),
    }
}

/// GET /recordings/interrupted
/// Sessions still in `recording` or `paused`, for the recovery prompt
pub async fn interrupted_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_interrupted_sessions().await {
        Ok(sessions) => (StatusCode::OK, Json(sessions)).into_response(),
        Err(e) => storage_unavailable("Failed to list interrupted recordings", e),
    }
}

/// GET /recordings/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_session(&session_id).await {
        Ok(Some(session)) => (StatusCode::OK, Json(session)).into_response(),
        Ok(None) => session_not_found(&session_id),
        Err(e) => storage_unavailable("Failed to load recording", e),
    }
}

/// DELETE /recordings/:session_id
/// Discard a session and its chunks; deleting an unknown id succeeds
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_session(&session_id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => storage_unavailable("Failed to delete recording", e),
    }
}

/// PUT /recordings/:session_id/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> impl IntoResponse {
    match state
        .store
        .update_session_status(&session_id, req.status)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => storage_unavailable("Failed to update recording status", e),
    }
}

/// PUT /recordings/:session_id/chunks/:index
/// Store one encoded chunk (raw request body)
pub async fn save_chunk(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(String, u32)>,
    body: Bytes,
) -> impl IntoResponse {
    match state
        .store
        .save_chunk(&session_id, index, body.to_vec())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => storage_unavailable("Could not save recording locally", e),
    }
}

/// GET /recordings/:session_id/audio
/// The session's chunks joined in index order, typed with its mime type
pub async fn assemble_recording(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.store.assemble_recording(&session_id).await {
        Ok(Some(recording)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, recording.mime_type)],
            recording.data,
        )
            .into_response(),
        Ok(None) => session_not_found(&session_id),
        Err(e) => storage_unavailable("Failed to assemble recording", e),
    }
}

/// GET /recordings/:session_id/integrity
pub async fn inspect_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.store.inspect_session(&session_id).await {
        Ok(Some(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(None) => session_not_found(&session_id),
        Err(e) => storage_unavailable("Failed to inspect recording", e),
    }
}

/// POST /recordings/cleanup?maxAgeSecs=N
/// Remove completed sessions older than the given (or configured) age
pub async fn cleanup_sessions(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> impl IntoResponse {
    let max_age = params
        .max_age_secs
        .map(Duration::from_secs)
        .unwrap_or(state.cleanup_max_age);

    match state.store.cleanup_old_sessions(max_age).await {
        Ok(deleted) => {
            info!("Cleanup removed {} recording(s)", deleted);
            (StatusCode::OK, Json(CleanupResponse { deleted })).into_response()
        }
        Err(e) => storage_unavailable("Failed to clean up recordings", e),
    }
}

/// GET /recordings/usage
pub async fn storage_usage(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_storage_size().await {
        Ok(total_bytes) => (StatusCode::OK, Json(UsageResponse { total_bytes })).into_response(),
        Err(e) => storage_unavailable("Failed to compute storage usage", e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
