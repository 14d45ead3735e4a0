//! Error types for the shelfsync engine.

use crate::schema::SchemaError;
use crate::wire::ImportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable failure codes shared by the engine and the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad record shape. Never retried; the record is partitioned out.
    SchemaValidationError,
    /// Major schema version mismatch without a requested migration.
    VersionIncompatible,
    /// Import payload checksum does not match its contents.
    ChecksumMismatch,
    /// Import payload is malformed or structurally inconsistent.
    FileCorrupted,
    /// The persistence layer ran out of space.
    StorageQuotaExceeded,
    /// The persistence layer failed for another reason.
    StorageError,
    /// Transient transfer failure.
    NetworkError,
    /// Transfer exceeded its time ceiling.
    Timeout,
    /// A record is waiting for a human decision. Not a failure.
    ConflictUnresolved,
    /// The caller asked for something that does not exist or is not allowed now.
    InvalidRequest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SchemaValidationError => "SCHEMA_VALIDATION_ERROR",
            ErrorCode::VersionIncompatible => "VERSION_INCOMPATIBLE",
            ErrorCode::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ErrorCode::FileCorrupted => "FILE_CORRUPTED",
            ErrorCode::StorageQuotaExceeded => "STORAGE_QUOTA_EXCEEDED",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConflictUnresolved => "CONFLICT_UNRESOLVED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }

    /// Whether failures with this code are retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::NetworkError | ErrorCode::Timeout)
    }

    /// A short remediation hint suitable for showing to a user.
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorCode::SchemaValidationError => {
                "Inspect the rejected records; the remaining records were merged"
            }
            ErrorCode::VersionIncompatible => {
                "Upgrade the older device or restart the sync with migration enabled"
            }
            ErrorCode::ChecksumMismatch => {
                "Export the library again on the source device; the file was modified"
            }
            ErrorCode::FileCorrupted => "Export the library again; the file could not be read",
            ErrorCode::StorageQuotaExceeded => {
                "Free storage space (see the cleanup estimate) and continue the sync"
            }
            ErrorCode::StorageError => "Check the storage backend and continue the sync",
            ErrorCode::NetworkError => "Check the connection between devices and retry",
            ErrorCode::Timeout => "Retry on a faster connection or raise the transfer timeout",
            ErrorCode::ConflictUnresolved => "Choose which reading status to keep",
            ErrorCode::InvalidRequest => "Check the identifiers in the request",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("invalid schema version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("no upgrade path from {from} to {to}")]
    NoUpgradePath { from: String, to: String },

    #[error("schema versions {from} and {to} are incompatible: {reason}")]
    VersionIncompatible {
        from: String,
        to: String,
        reason: String,
    },

    #[error("no pending decision for book '{0}'")]
    NoPendingDecision(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl Error {
    /// Map this error onto the shared failure taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Schema(_) => ErrorCode::SchemaValidationError,
            Error::Import(e) => e.code(),
            Error::InvalidVersion { .. } | Error::NoUpgradePath { .. } => {
                ErrorCode::VersionIncompatible
            }
            Error::VersionIncompatible { .. } => ErrorCode::VersionIncompatible,
            Error::NoPendingDecision(_) => ErrorCode::InvalidRequest,
            Error::Serialization(_) => ErrorCode::FileCorrupted,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaErrorKind;

    #[test]
    fn error_display() {
        let err = Error::NoUpgradePath {
            from: "2.0.0".into(),
            to: "1.0.0".into(),
        };
        assert_eq!(err.to_string(), "no upgrade path from 2.0.0 to 1.0.0");

        let err = Error::Schema(SchemaError::new(
            SchemaErrorKind::OutOfRange,
            "progress",
            "must be between 0 and 100, got 140",
        ));
        assert_eq!(
            err.to_string(),
            "OUT_OF_RANGE on field 'progress': must be between 0 and 100, got 140"
        );
    }

    #[test]
    fn codes_serialize_screaming() {
        let json = serde_json::to_string(&ErrorCode::StorageQuotaExceeded).unwrap();
        assert_eq!(json, r#""STORAGE_QUOTA_EXCEEDED""#);
        assert_eq!(ErrorCode::ChecksumMismatch.to_string(), "CHECKSUM_MISMATCH");
    }

    #[test]
    fn only_transfer_failures_retry() {
        assert!(ErrorCode::NetworkError.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(!ErrorCode::SchemaValidationError.is_retryable());
        assert!(!ErrorCode::VersionIncompatible.is_retryable());
        assert!(!ErrorCode::ChecksumMismatch.is_retryable());
    }
}
