//! Events published while a session runs.

use serde::{Deserialize, Serialize};
use shelfsync_engine::{PendingDecision, SyncCounts};

use super::SessionState;
use crate::error::FailureReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },

    /// Throttled; `percentage` never decreases within a session.
    Progress {
        session_id: String,
        state: SessionState,
        percentage: u8,
        processed_count: usize,
        total_count: usize,
    },

    /// A record waits for a status choice.
    PendingDecision {
        session_id: String,
        decision: PendingDecision,
    },

    Completed {
        session_id: String,
        counts: SyncCounts,
        integrity_percent: f64,
    },

    Failed {
        session_id: String,
        report: FailureReport,
    },

    Cancelled {
        session_id: String,
        counts: SyncCounts,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::Progress { session_id, .. }
            | SessionEvent::PendingDecision { session_id, .. }
            | SessionEvent::Completed { session_id, .. }
            | SessionEvent::Failed { session_id, .. }
            | SessionEvent::Cancelled { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_shape() {
        let event = SessionEvent::Progress {
            session_id: "s-1".into(),
            state: SessionState::Importing,
            percentage: 42,
            processed_count: 420,
            total_count: 1000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["state"], "IMPORTING");
        assert_eq!(json["processed_count"], 420);
        assert_eq!(event.session_id(), "s-1");
    }
}
