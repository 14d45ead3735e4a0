//! Session endpoint routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use shelfsync_engine::PendingDecision;

use crate::error::Result;
use crate::handlers::{
    handle_cancel, handle_get, handle_history, handle_list, handle_pending, handle_resolve,
    handle_start, ResolveRequest, SessionList, StartSessionRequest,
};
use crate::session::SyncSession;
use crate::AppState;

/// Create session routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_handler).post(start_handler))
        .route("/sessions/{id}", get(get_handler).delete(cancel_handler))
        .route("/sessions/{id}/pending", get(pending_handler))
        .route("/sessions/{id}/decisions", post(resolve_handler))
        .route("/history", get(history_handler))
}

/// POST /sessions - Start a sync session.
async fn start_handler(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<SyncSession>)> {
    let session = handle_start(&state.service, request)?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

/// GET /sessions - Live sessions and recent history.
async fn list_handler(State(state): State<AppState>) -> Json<SessionList> {
    Json(handle_list(&state.service).await)
}

/// GET /sessions/{id}
async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncSession>> {
    Ok(Json(handle_get(&state.service, &id)?))
}

/// DELETE /sessions/{id} - Cancel a session after its current batch.
async fn cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SyncSession>)> {
    let session = handle_cancel(&state.service, &id)?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

/// GET /sessions/{id}/pending
async fn pending_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PendingDecision>>> {
    Ok(Json(handle_pending(&state.service, &id)?))
}

/// POST /sessions/{id}/decisions
async fn resolve_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<StatusCode> {
    handle_resolve(&state.service, &id, request)?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /history - Finished sessions, newest first.
async fn history_handler(State(state): State<AppState>) -> Json<Vec<SyncSession>> {
    Json(handle_history(&state.service).await)
}
