//! Shared session table, pending decisions, history and event fan-out.

use std::collections::VecDeque;

use dashmap::DashMap;
use shelfsync_engine::PendingDecision;
use tokio::sync::{broadcast, Mutex};

use super::{SessionEvent, SessionState, SyncSession};
use crate::error::{SyncError, SyncResult};

/// Events buffered per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 1024;

/// Owned by the service; runners write through it, readers never block them.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, SyncSession>,
    pending: DashMap<String, Vec<PendingDecision>>,
    /// Finished session ids, oldest first
    history: Mutex<VecDeque<String>>,
    history_limit: usize,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(history_limit: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            sessions: DashMap::new(),
            pending: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
            events,
        }
    }

    pub fn insert(&self, session: SyncSession) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<SyncSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Sessions that have not reached a terminal state.
    pub fn live(&self) -> Vec<SyncSession> {
        let mut live: Vec<SyncSession> = self
            .sessions
            .iter()
            .filter(|s| !s.state.is_terminal())
            .map(|s| s.clone())
            .collect();
        live.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        live
    }

    pub fn update<F>(&self, session_id: &str, f: F)
    where
        F: FnOnce(&mut SyncSession),
    {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            f(&mut session);
        }
    }

    /// Move a session to `to`, publishing the change.
    pub fn transition(&self, session_id: &str, to: SessionState) -> SyncResult<()> {
        let from = {
            let mut session = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| SyncError::UnknownSession(session_id.to_string()))?;
            let from = session.state;
            if !from.can_transition_to(to) {
                return Err(SyncError::Internal(format!(
                    "illegal transition {from} -> {to} for session {session_id}"
                )));
            }
            session.state = to;
            from
        };

        tracing::info!(session_id, %from, %to, "Session state changed");
        self.publish(SessionEvent::StateChanged {
            session_id: session_id.to_string(),
            from,
            to,
        });
        Ok(())
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn set_pending(&self, session_id: &str, decisions: Vec<PendingDecision>) {
        if decisions.is_empty() {
            self.pending.remove(session_id);
        } else {
            self.pending.insert(session_id.to_string(), decisions);
        }
    }

    pub fn pending(&self, session_id: &str) -> Vec<PendingDecision> {
        self.pending
            .get(session_id)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn has_pending(&self, session_id: &str, book_id: &str) -> bool {
        self.pending
            .get(session_id)
            .is_some_and(|p| p.iter().any(|d| d.book_id == book_id))
    }

    /// Drop one pending decision once it has been applied.
    pub fn remove_pending(&self, session_id: &str, book_id: &str) {
        let now_empty = match self.pending.get_mut(session_id) {
            Some(mut decisions) => {
                decisions.retain(|d| d.book_id != book_id);
                decisions.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.pending.remove(session_id);
        }
    }

    /// Record a finished session, evicting the oldest beyond the limit.
    pub async fn archive(&self, session_id: &str) {
        self.pending.remove(session_id);
        let mut history = self.history.lock().await;
        history.push_back(session_id.to_string());
        while history.len() > self.history_limit {
            if let Some(evicted) = history.pop_front() {
                self.sessions.remove(&evicted);
            }
        }
    }

    /// Finished sessions, newest first.
    pub async fn history(&self) -> Vec<SyncSession> {
        let history = self.history.lock().await;
        history.iter().rev().filter_map(|id| self.get(id)).collect()
    }
}
