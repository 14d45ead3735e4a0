//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shelfsync_engine::{ErrorCode, ImportError};

use crate::ports::{StoreError, TransportError};

/// Errors that end or refuse a sync session.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Engine error: {0}")]
    Engine(#[from] shelfsync_engine::Error),

    #[error("Import rejected: {0}")]
    Import(#[from] ImportError),

    #[error("Schema {source_version} cannot be synced into {target_version}: {reason}")]
    VersionIncompatible {
        source_version: String,
        target_version: String,
        reason: String,
        required_migration_path: Vec<String>,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transfer failed after {attempts} attempt(s): {last}")]
    Transport { attempts: u32, last: TransportError },

    #[error("Verification found {} mismatched record(s), integrity {integrity_percent:.1}%", .mismatched.len())]
    VerificationFailed {
        integrity_percent: f64,
        mismatched: Vec<String>,
    },

    #[error("Unknown store: {0}")]
    UnknownStore(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session {session_id} has no pending decision for book {book_id}")]
    NoPendingDecision { session_id: String, book_id: String },

    #[error("Session {0} has already finished")]
    SessionFinished(String),

    #[error("No interrupted sync for store {0}")]
    NoCheckpoint(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// What a user can do about a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualOption {
    RetrySync,
    CheckConnection,
    ManualFileTransfer,
    FreeStorage,
    EnableMigration,
    UpgradeOlderDevice,
    ExportAgain,
    Rollback,
}

/// Machine code, human message and remediation hint of a session failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub code: ErrorCode,
    pub message: String,
    pub remediation: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub details: Value,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub manual_options: Vec<ManualOption>,
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Engine(e) => e.code(),
            SyncError::Import(e) => e.code(),
            SyncError::VersionIncompatible { .. } => ErrorCode::VersionIncompatible,
            SyncError::Store(e) => e.code(),
            SyncError::Transport { last, .. } => last.code(),
            SyncError::VerificationFailed { .. } | SyncError::Internal(_) => ErrorCode::StorageError,
            SyncError::UnknownStore(_)
            | SyncError::UnknownSession(_)
            | SyncError::NoPendingDecision { .. }
            | SyncError::SessionFinished(_)
            | SyncError::NoCheckpoint(_)
            | SyncError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    /// Report for a session that ended with this error.
    pub fn report(&self) -> FailureReport {
        let code = self.code();
        let (details, manual_options) = match self {
            SyncError::Import(e) => (
                json!({
                    "type": e.kind,
                    "location": e.location,
                    "suggestion": e.suggestion,
                }),
                vec![ManualOption::ExportAgain],
            ),
            SyncError::VersionIncompatible {
                source_version,
                target_version,
                required_migration_path,
                ..
            } => (
                json!({
                    "sourceVersion": source_version,
                    "targetVersion": target_version,
                    "requiredMigrationPath": required_migration_path,
                }),
                vec![ManualOption::EnableMigration, ManualOption::UpgradeOlderDevice],
            ),
            SyncError::Store(e @ StoreError::QuotaExceeded { used, limit, requested }) => (
                json!({
                    "used": used,
                    "limit": limit,
                    "requested": requested,
                    "cleanupEstimate": e.cleanup_estimate(),
                }),
                vec![ManualOption::FreeStorage, ManualOption::Rollback],
            ),
            SyncError::Store(_) => (Value::Null, vec![ManualOption::RetrySync, ManualOption::Rollback]),
            SyncError::Transport { attempts, last } => (
                json!({
                    "attempts": attempts,
                    "lastError": last.to_string(),
                }),
                vec![
                    ManualOption::RetrySync,
                    ManualOption::CheckConnection,
                    ManualOption::ManualFileTransfer,
                ],
            ),
            SyncError::VerificationFailed {
                integrity_percent,
                mismatched,
            } => (
                json!({
                    "integrityPercent": integrity_percent,
                    "mismatched": mismatched,
                }),
                vec![ManualOption::RetrySync, ManualOption::Rollback],
            ),
            _ => (Value::Null, Vec::new()),
        };

        FailureReport {
            code,
            message: self.to_string(),
            remediation: code.remediation().to_string(),
            // Transfer errors only surface once retries are exhausted.
            retryable: code.is_retryable() && !matches!(self, SyncError::Transport { .. }),
            details,
            manual_options,
        }
    }
}

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<FailureReport>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code, details) = match &self {
            AppError::Sync(e) => {
                let status = match e {
                    SyncError::UnknownStore(_)
                    | SyncError::UnknownSession(_)
                    | SyncError::NoPendingDecision { .. }
                    | SyncError::NoCheckpoint(_) => StatusCode::NOT_FOUND,
                    SyncError::SessionFinished(_) => StatusCode::CONFLICT,
                    SyncError::InvalidRequest(_) | SyncError::VersionIncompatible { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!("Sync error: {:?}", e);
                } else {
                    tracing::warn!("Sync error: {}", e);
                }
                (status, e.to_string(), Some(e.code()), Some(e.report()))
            }
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                msg.clone(),
                Some(ErrorCode::InvalidRequest),
                None,
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None, None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for session operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_report_carries_cleanup_estimate() {
        let err = SyncError::Store(StoreError::QuotaExceeded {
            used: 4_000,
            limit: 5_000,
            requested: 1_500,
        });
        let report = err.report();

        assert_eq!(report.code, ErrorCode::StorageQuotaExceeded);
        assert_eq!(report.details["cleanupEstimate"], 500);
        assert!(!report.retryable);
        assert!(report.manual_options.contains(&ManualOption::FreeStorage));
    }

    #[test]
    fn exhausted_transfer_is_not_retryable() {
        let err = SyncError::Transport {
            attempts: 4,
            last: TransportError::Timeout(30_000),
        };
        let report = err.report();

        assert_eq!(report.code, ErrorCode::Timeout);
        assert!(!report.retryable);
        assert_eq!(report.details["attempts"], 4);
        assert_eq!(
            report.manual_options,
            vec![
                ManualOption::RetrySync,
                ManualOption::CheckConnection,
                ManualOption::ManualFileTransfer
            ]
        );
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = SyncError::UnknownStore("tablet".into()).report();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["code"], "INVALID_REQUEST");
        assert_eq!(json["retryable"], false);
        assert!(json.get("details").is_none());
        assert!(json.get("manualOptions").is_none());
        assert!(json["remediation"].as_str().is_some());
    }

    #[test]
    fn version_report_lists_migration_path() {
        let err = SyncError::VersionIncompatible {
            source_version: "1.2.0".into(),
            target_version: "2.0.0".into(),
            reason: "major mismatch".into(),
            required_migration_path: vec!["1.2.0".into(), "2.0.0".into()],
        };
        let report = err.report();
        assert_eq!(report.code, ErrorCode::VersionIncompatible);
        assert_eq!(report.details["requiredMigrationPath"][1], "2.0.0");
    }
}
