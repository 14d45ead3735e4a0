//! Collaborator interfaces the sync session is built on.
//!
//! Every method is awaited and atomic per record. Sessions receive these as
//! trait objects; no component reaches for ambient storage.

use async_trait::async_trait;
use shelfsync_engine::{BookRecord, ErrorCode};

use crate::session::Checkpoint;

/// Errors raised by a [`BookStore`] or [`CheckpointStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded: {used} of {limit} bytes used, {requested} more requested")]
    QuotaExceeded {
        used: u64,
        limit: u64,
        requested: u64,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored data is unreadable: {0}")]
    Backend(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::QuotaExceeded { .. } => ErrorCode::StorageQuotaExceeded,
            _ => ErrorCode::StorageError,
        }
    }

    /// Bytes to free before the failed write fits.
    pub fn cleanup_estimate(&self) -> Option<u64> {
        match self {
            StoreError::QuotaExceeded {
                used,
                limit,
                requested,
            } => Some((used + requested).saturating_sub(*limit)),
            _ => None,
        }
    }
}

/// Errors raised by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("transfer timed out after {0} ms")]
    Timeout(u64),

    /// The channel is gone; retrying cannot help.
    #[error("transport channel closed")]
    Closed,
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::Timeout(_) => ErrorCode::Timeout,
            _ => ErrorCode::NetworkError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Closed)
    }
}

/// Persistence port of one device's library.
#[async_trait]
pub trait BookStore: Send + Sync {
    fn store_id(&self) -> &str;

    /// Schema version the store's records are written in.
    async fn schema_version(&self) -> Result<String, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<BookRecord>, StoreError>;

    /// Every record, sorted by id.
    async fn list(&self) -> Result<Vec<BookRecord>, StoreError>;

    /// Insert or replace one record.
    async fn put(&self, record: &BookRecord) -> Result<(), StoreError>;

    /// Remove one record. Missing ids are not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Moves an export payload between devices.
///
/// `channel` names one transfer; sessions use their own id.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn write_bytes(&self, channel: &str, bytes: &[u8]) -> Result<(), TransportError>;

    async fn read_bytes(&self, channel: &str) -> Result<Vec<u8>, TransportError>;
}

/// Durable storage for session checkpoints, one per target store.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    async fn load(&self, target_store_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn clear(&self, target_store_id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_cleanup_estimate() {
        let err = StoreError::QuotaExceeded {
            used: 900,
            limit: 1000,
            requested: 250,
        };
        assert_eq!(err.code(), ErrorCode::StorageQuotaExceeded);
        assert_eq!(err.cleanup_estimate(), Some(150));
        assert_eq!(StoreError::Unavailable("down".into()).cleanup_estimate(), None);
    }

    #[test]
    fn transport_codes() {
        assert_eq!(TransportError::Timeout(30_000).code(), ErrorCode::Timeout);
        assert_eq!(TransportError::Network("reset".into()).code(), ErrorCode::NetworkError);
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(!TransportError::Closed.is_retryable());
    }
}
