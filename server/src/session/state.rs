//! Session lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shelfsync_engine::{
    BookRecord, ConflictRecord, InvalidRecord, StoreId, SyncCounts, Verification,
};

use crate::error::FailureReport;

/// States of a sync session.
///
/// ```text
/// IDLE → PREPARING → EXPORTING → TRANSFERRING → IMPORTING → VERIFYING → COMPLETED
///   ↘ RECOVERING ↗ (resumes at PREPARING, then EXPORTING or IMPORTING)
/// any active state → FAILED | CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Preparing,
    Exporting,
    Transferring,
    Importing,
    Verifying,
    Completed,
    Failed,
    Cancelled,
    Recovering,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }

    /// States in which the session may mutate the target store.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Preparing
                | SessionState::Exporting
                | SessionState::Transferring
                | SessionState::Importing
                | SessionState::Verifying
                | SessionState::Recovering
        )
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Preparing)
                | (Idle, Recovering)
                | (Recovering, Preparing)
                | (Preparing, Exporting)
                | (Preparing, Importing)
                | (Exporting, Transferring)
                | (Transferring, Importing)
                | (Importing, Verifying)
                | (Verifying, Completed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Preparing => "PREPARING",
            SessionState::Exporting => "EXPORTING",
            SessionState::Transferring => "TRANSFERRING",
            SessionState::Importing => "IMPORTING",
            SessionState::Verifying => "VERIFYING",
            SessionState::Completed => "COMPLETED",
            SessionState::Failed => "FAILED",
            SessionState::Cancelled => "CANCELLED",
            SessionState::Recovering => "RECOVERING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    /// Monotonic, 0..=100
    pub percentage: u8,
    pub processed_count: usize,
    pub total_count: usize,
}

/// One synchronization attempt between a source and a target store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub id: String,
    pub source_store_id: StoreId,
    pub target_store_id: StoreId,
    /// Interrupted session this one continues
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Fully committed work only
    pub counts: SyncCounts,
    pub progress: SessionProgress,
    /// Whether the session waits on a pending decision
    pub awaiting_decision: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    /// Source records that failed validation
    pub rejected: Vec<InvalidRecord>,
    /// Audit log of the conflicts found
    pub conflicts: Vec<ConflictRecord>,
}

impl SyncSession {
    pub fn new(id: impl Into<String>, source: impl Into<StoreId>, target: impl Into<StoreId>) -> Self {
        Self {
            id: id.into(),
            source_store_id: source.into(),
            target_store_id: target.into(),
            resumed_from: None,
            state: SessionState::Idle,
            started_at: Utc::now(),
            completed_at: None,
            counts: SyncCounts::default(),
            progress: SessionProgress::default(),
            awaiting_decision: false,
            failure: None,
            verification: None,
            rejected: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

/// Phase a checkpoint was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointPhase {
    Exporting,
    Importing,
}

/// State persisted before EXPORTING and IMPORTING, and after every batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub session_id: String,
    pub source_store_id: StoreId,
    pub target_store_id: StoreId,
    pub phase: CheckpointPhase,
    pub counts: SyncCounts,
    /// Highest record id whose batch fully committed
    pub last_committed_id: Option<String>,
    /// Export payload received by the target
    pub payload: Option<String>,
    /// Target contents before the import started
    pub target_backup: Option<Vec<BookRecord>>,
    pub allow_migration: bool,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(session: &SyncSession, phase: CheckpointPhase, allow_migration: bool) -> Self {
        Self {
            session_id: session.id.clone(),
            source_store_id: session.source_store_id.clone(),
            target_store_id: session.target_store_id.clone(),
            phase,
            counts: session.counts,
            last_committed_id: None,
            payload: None,
            target_backup: None,
            allow_migration,
            saved_at: Utc::now(),
        }
    }

    /// Whether the record with `id` was committed before the checkpoint.
    pub fn is_committed(&self, id: &str) -> bool {
        self.last_committed_id
            .as_deref()
            .is_some_and(|last| id <= last)
    }
}

/// How to leave an interrupted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Resume from the checkpoint's phase
    Continue,
    /// Drop the checkpoint and sync from scratch
    Restart,
    /// Restore the target as it was before the import
    Rollback,
}

/// What `check_incomplete_sync` found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOffer {
    pub session_id: String,
    pub source_store_id: StoreId,
    pub target_store_id: StoreId,
    pub phase: CheckpointPhase,
    pub counts: SyncCounts,
    pub last_committed_id: Option<String>,
    pub saved_at: DateTime<Utc>,
    pub options: Vec<RecoveryAction>,
}

impl From<&Checkpoint> for RecoveryOffer {
    fn from(checkpoint: &Checkpoint) -> Self {
        let mut options = vec![RecoveryAction::Continue, RecoveryAction::Restart];
        if checkpoint.target_backup.is_some() {
            options.push(RecoveryAction::Rollback);
        }
        Self {
            session_id: checkpoint.session_id.clone(),
            source_store_id: checkpoint.source_store_id.clone(),
            target_store_id: checkpoint.target_store_id.clone(),
            phase: checkpoint.phase,
            counts: checkpoint.counts,
            last_committed_id: checkpoint.last_committed_id.clone(),
            saved_at: checkpoint.saved_at,
            options,
        }
    }
}
