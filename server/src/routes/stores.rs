//! Store endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use shelfsync_engine::ConvergenceReport;

use crate::error::Result;
use crate::handlers::{
    handle_check_recovery, handle_convergence, handle_recover, handle_stats, handle_store_list,
    RecoveryCheck, RecoveryRequest,
};
use crate::service::StoreStats;
use crate::session::SyncSession;
use crate::AppState;

/// Query parameters for GET /convergence.
#[derive(Debug, Deserialize)]
pub struct ConvergenceQuery {
    /// Comma separated store ids; all stores when absent
    pub stores: Option<String>,
}

/// Create store routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stores", get(list_handler))
        .route("/stores/{id}/stats", get(stats_handler))
        .route(
            "/stores/{id}/recovery",
            get(check_recovery_handler).post(recover_handler),
        )
        .route("/convergence", get(convergence_handler))
}

/// GET /stores - Stats of every registered store.
async fn list_handler(State(state): State<AppState>) -> Result<Json<Vec<StoreStats>>> {
    Ok(Json(handle_store_list(&state.service).await?))
}

/// GET /stores/{id}/stats
async fn stats_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoreStats>> {
    Ok(Json(handle_stats(&state.service, &id).await?))
}

/// GET /stores/{id}/recovery - Interrupted sync into this store, if any.
async fn check_recovery_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecoveryCheck>> {
    Ok(Json(handle_check_recovery(&state.service, &id).await?))
}

/// POST /stores/{id}/recovery - Continue, restart or roll back.
async fn recover_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RecoveryRequest>,
) -> Result<(StatusCode, Json<SyncSession>)> {
    let session = handle_recover(&state.service, &id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

/// GET /convergence?stores=a,b
async fn convergence_handler(
    State(state): State<AppState>,
    Query(query): Query<ConvergenceQuery>,
) -> Result<Json<ConvergenceReport>> {
    Ok(Json(
        handle_convergence(&state.service, query.stores.as_deref()).await?,
    ))
}
