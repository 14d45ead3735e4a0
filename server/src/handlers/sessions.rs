//! Session control handlers.
//!
//! These sit between the HTTP and WebSocket surfaces and [`SyncService`]:
//! they check request bodies and shape responses, and leave the actual work
//! to the service.

use serde::{Deserialize, Serialize};
use shelfsync_engine::{ConvergenceReport, PendingDecision, StatusChoice, StoreId};

use crate::error::{AppError, Result};
use crate::service::{StartOptions, StoreStats, SyncService};
use crate::session::{RecoveryAction, RecoveryOffer, SyncSession};

/// Request body for POST /sessions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub source_store_id: StoreId,
    pub target_store_id: StoreId,
    #[serde(default)]
    pub allow_migration: bool,
}

/// Request body for POST /sessions/{id}/decisions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub book_id: String,
    pub choice: StatusChoice,
}

/// Request body for POST /stores/{id}/recovery.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequest {
    pub action: RecoveryAction,
}

/// Live and finished sessions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    pub live: Vec<SyncSession>,
    pub history: Vec<SyncSession>,
}

/// Response of GET /stores/{id}/recovery.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryCheck {
    pub store_id: StoreId,
    pub incomplete: Option<RecoveryOffer>,
}

/// Start a session.
pub fn handle_start(service: &SyncService, request: StartSessionRequest) -> Result<SyncSession> {
    if request.source_store_id.trim().is_empty() || request.target_store_id.trim().is_empty() {
        return Err(AppError::BadRequest(
            "sourceStoreId and targetStoreId are required".to_string(),
        ));
    }

    let session = service.start(
        &request.source_store_id,
        &request.target_store_id,
        StartOptions {
            allow_migration: request.allow_migration,
        },
    )?;

    tracing::info!(
        session_id = %session.id,
        source = %session.source_store_id,
        target = %session.target_store_id,
        allow_migration = request.allow_migration,
        "Session started"
    );

    Ok(session)
}

pub async fn handle_list(service: &SyncService) -> SessionList {
    SessionList {
        live: service.live_sessions(),
        history: service.history().await,
    }
}

pub fn handle_get(service: &SyncService, session_id: &str) -> Result<SyncSession> {
    Ok(service.session(session_id)?)
}

pub fn handle_cancel(service: &SyncService, session_id: &str) -> Result<SyncSession> {
    Ok(service.cancel(session_id)?)
}

pub fn handle_pending(service: &SyncService, session_id: &str) -> Result<Vec<PendingDecision>> {
    Ok(service.pending(session_id)?)
}

/// Deliver a status choice for one pending record.
pub fn handle_resolve(
    service: &SyncService,
    session_id: &str,
    request: ResolveRequest,
) -> Result<()> {
    if request.book_id.is_empty() {
        return Err(AppError::BadRequest("bookId is required".to_string()));
    }
    service.resolve_pending(session_id, &request.book_id, request.choice)?;

    tracing::debug!(
        session_id,
        book_id = %request.book_id,
        choice = ?request.choice,
        "Decision delivered"
    );
    Ok(())
}

pub async fn handle_history(service: &SyncService) -> Vec<SyncSession> {
    service.history().await
}

pub async fn handle_stats(service: &SyncService, store_id: &str) -> Result<StoreStats> {
    Ok(service.stats(store_id).await?)
}

/// Stats of every registered store.
pub async fn handle_store_list(service: &SyncService) -> Result<Vec<StoreStats>> {
    let mut stats = Vec::new();
    for id in service.store_ids() {
        stats.push(service.stats(&id).await?);
    }
    Ok(stats)
}

/// Convergence of a comma separated list of stores, or of all of them.
pub async fn handle_convergence(
    service: &SyncService,
    stores: Option<&str>,
) -> Result<ConvergenceReport> {
    let ids: Vec<StoreId> = stores
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Ok(service.convergence(&ids).await?)
}

pub async fn handle_check_recovery(service: &SyncService, store_id: &str) -> Result<RecoveryCheck> {
    Ok(RecoveryCheck {
        store_id: store_id.to_string(),
        incomplete: service.check_incomplete_sync(store_id).await?,
    })
}

pub async fn handle_recover(
    service: &SyncService,
    store_id: &str,
    request: RecoveryRequest,
) -> Result<SyncSession> {
    Ok(service.recover(store_id, request.action).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::error::SyncError;
    use crate::memory::{InMemoryBookStore, InMemoryCheckpointStore, InMemoryTransport};
    use std::sync::Arc;

    fn service() -> SyncService {
        let service = SyncService::new(
            Arc::new(InMemoryTransport::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            SyncSettings::default(),
        );
        service.register_store(Arc::new(InMemoryBookStore::new("laptop")));
        service.register_store(Arc::new(InMemoryBookStore::new("phone")));
        service
    }

    #[test]
    fn test_request_deserialization() {
        let json = r#"{"sourceStoreId": "laptop", "targetStoreId": "phone"}"#;
        let request: StartSessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.source_store_id, "laptop");
        assert!(!request.allow_migration);

        let json = r#"{"bookId": "b-1", "choice": "LOCAL"}"#;
        let request: ResolveRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.choice, StatusChoice::Local);

        let json = r#"{"action": "rollback"}"#;
        let request: RecoveryRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.action, RecoveryAction::Rollback);
    }

    #[tokio::test]
    async fn test_start_requires_store_ids() {
        let service = service();
        let request = StartSessionRequest {
            source_store_id: " ".to_string(),
            target_store_id: "phone".to_string(),
            allow_migration: false,
        };
        assert!(matches!(
            handle_start(&service, request),
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_without_pending_decision() {
        let service = service();
        let session = handle_start(
            &service,
            StartSessionRequest {
                source_store_id: "laptop".to_string(),
                target_store_id: "phone".to_string(),
                allow_migration: false,
            },
        )
        .unwrap();

        let result = handle_resolve(
            &service,
            &session.id,
            ResolveRequest {
                book_id: "b-1".to_string(),
                choice: StatusChoice::Remote,
            },
        );
        assert!(matches!(
            result,
            Err(AppError::Sync(SyncError::NoPendingDecision { .. }))
        ));
    }

    #[tokio::test]
    async fn test_convergence_of_empty_stores() {
        let service = service();
        let report = handle_convergence(&service, Some("laptop, phone")).await.unwrap();
        assert!(report.converged);

        let all = handle_convergence(&service, None).await.unwrap();
        assert_eq!(all, report);
    }
}
