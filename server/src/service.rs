//! Control surface of the sync engine.
//!
//! [`SyncService`] starts sessions, routes cancel requests and status
//! decisions to them, and answers read-only queries. Sessions targeting the
//! same store are queued behind a per-store lock; queries never take it.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shelfsync_engine::{
    checksum, consistency::convergence_of_checksums, ConvergenceReport, PendingDecision,
    ReadingStatus, StatusChoice, StoreId,
};
use tokio::sync::{broadcast, mpsc, watch, Mutex};

use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::ports::{BookStore, CheckpointStore, Transport};
use crate::session::{
    Decision, RecoveryAction, RecoveryOffer, RunMode, SessionContext, SessionEvent,
    SessionRegistry, SessionRunner, SyncSession,
};

/// Options of a new session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    /// Migrate an older major version instead of refusing it
    #[serde(default)]
    pub allow_migration: bool,
}

/// Read-only summary of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub store_id: StoreId,
    pub schema_version: String,
    pub record_count: usize,
    pub by_status: BTreeMap<ReadingStatus, usize>,
    pub checksum: String,
    /// Live session writing to this store, if any
    pub active_session: Option<String>,
}

/// Handles the service keeps for a live session.
#[derive(Debug)]
struct SessionControl {
    cancel: watch::Sender<bool>,
    decisions: mpsc::UnboundedSender<Decision>,
    done: watch::Receiver<bool>,
}

pub struct SyncService {
    stores: DashMap<StoreId, Arc<dyn BookStore>>,
    transport: Arc<dyn Transport>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: SyncSettings,
    registry: Arc<SessionRegistry>,
    controls: Arc<DashMap<String, SessionControl>>,
    store_locks: DashMap<StoreId, Arc<Mutex<()>>>,
}

impl SyncService {
    pub fn new(
        transport: Arc<dyn Transport>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            stores: DashMap::new(),
            transport,
            checkpoints,
            registry: Arc::new(SessionRegistry::new(settings.history_limit)),
            settings,
            controls: Arc::new(DashMap::new()),
            store_locks: DashMap::new(),
        }
    }

    pub fn new_shared(
        transport: Arc<dyn Transport>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: SyncSettings,
    ) -> Arc<Self> {
        Arc::new(Self::new(transport, checkpoints, settings))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn register_store(&self, store: Arc<dyn BookStore>) {
        let id = store.store_id().to_string();
        tracing::info!(store_id = %id, "Store registered");
        self.stores.insert(id, store);
    }

    pub fn store_ids(&self) -> Vec<StoreId> {
        let mut ids: Vec<StoreId> = self.stores.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn store(&self, store_id: &str) -> SyncResult<Arc<dyn BookStore>> {
        self.stores
            .get(store_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| SyncError::UnknownStore(store_id.to_string()))
    }

    /// Start syncing `source` into `target`. Returns at once; the session is
    /// queued if another one is writing to `target`.
    pub fn start(
        &self,
        source_id: &str,
        target_id: &str,
        options: StartOptions,
    ) -> SyncResult<SyncSession> {
        if source_id == target_id {
            return Err(SyncError::InvalidRequest(
                "source and target must be different stores".to_string(),
            ));
        }
        let source = self.store(source_id)?;
        let target = self.store(target_id)?;
        let session = SyncSession::new(uuid::Uuid::new_v4().to_string(), source_id, target_id);
        Ok(self.spawn(session, source, target, options.allow_migration, RunMode::Fresh))
    }

    fn spawn(
        &self,
        session: SyncSession,
        source: Arc<dyn BookStore>,
        target: Arc<dyn BookStore>,
        allow_migration: bool,
        mode: RunMode,
    ) -> SyncSession {
        let session_id = session.id.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);

        self.registry.insert(session.clone());
        self.controls.insert(
            session_id.clone(),
            SessionControl {
                cancel: cancel_tx,
                decisions: decision_tx,
                done: done_rx,
            },
        );

        let lock = self
            .store_locks
            .entry(session.target_store_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let ctx = SessionContext {
            session_id: session_id.clone(),
            source,
            target,
            transport: Arc::clone(&self.transport),
            checkpoints: Arc::clone(&self.checkpoints),
            registry: Arc::clone(&self.registry),
            settings: self.settings.clone(),
            allow_migration,
            mode,
            cancel: cancel_rx,
            decisions: decision_rx,
        };
        let controls = Arc::clone(&self.controls);

        tracing::info!(
            session_id = %session_id,
            source = %session.source_store_id,
            target = %session.target_store_id,
            "Sync session queued"
        );

        tokio::spawn(async move {
            let _guard = lock.lock_owned().await;
            let state = SessionRunner::new(ctx).run().await;
            tracing::debug!(session_id = %session_id, %state, "Session task finished");
            let _ = done_tx.send(true);
            controls.remove(&session_id);
        });

        session
    }

    /// Ask a session to stop after its current batch.
    pub fn cancel(&self, session_id: &str) -> SyncResult<SyncSession> {
        let session = self.session(session_id)?;
        let control = self
            .controls
            .get(session_id)
            .ok_or_else(|| SyncError::SessionFinished(session_id.to_string()))?;
        if session.state.is_terminal() {
            return Err(SyncError::SessionFinished(session_id.to_string()));
        }

        tracing::info!(session_id, state = %session.state, "Cancel requested");
        let _ = control.cancel.send(true);
        Ok(session)
    }

    /// Deliver a status choice for one pending record.
    pub fn resolve_pending(
        &self,
        session_id: &str,
        book_id: &str,
        choice: StatusChoice,
    ) -> SyncResult<()> {
        self.session(session_id)?;
        if !self.registry.has_pending(session_id, book_id) {
            return Err(SyncError::NoPendingDecision {
                session_id: session_id.to_string(),
                book_id: book_id.to_string(),
            });
        }
        let control = self
            .controls
            .get(session_id)
            .ok_or_else(|| SyncError::SessionFinished(session_id.to_string()))?;

        control
            .decisions
            .send(Decision {
                book_id: book_id.to_string(),
                choice,
            })
            .map_err(|_| SyncError::SessionFinished(session_id.to_string()))
    }

    pub fn pending(&self, session_id: &str) -> SyncResult<Vec<PendingDecision>> {
        self.session(session_id)?;
        Ok(self.registry.pending(session_id))
    }

    pub fn session(&self, session_id: &str) -> SyncResult<SyncSession> {
        self.registry
            .get(session_id)
            .ok_or_else(|| SyncError::UnknownSession(session_id.to_string()))
    }

    /// Sessions that are queued or running.
    pub fn live_sessions(&self) -> Vec<SyncSession> {
        self.registry.live()
    }

    /// Finished sessions, newest first.
    pub async fn history(&self) -> Vec<SyncSession> {
        self.registry.history().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.registry.subscribe()
    }

    /// Wait until a session reaches a terminal state.
    pub async fn wait(&self, session_id: &str) -> SyncResult<SyncSession> {
        let done = self.controls.get(session_id).map(|c| c.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.session(session_id)
    }

    /// Record count, status breakdown and checksum of a store.
    pub async fn stats(&self, store_id: &str) -> SyncResult<StoreStats> {
        let store = self.store(store_id)?;
        let records = store.list().await?;

        let mut by_status = BTreeMap::new();
        for record in &records {
            *by_status.entry(record.status).or_insert(0) += 1;
        }

        Ok(StoreStats {
            store_id: store_id.to_string(),
            schema_version: store.schema_version().await?,
            record_count: records.len(),
            by_status,
            checksum: checksum(&records),
            active_session: self.active_session_for(store_id),
        })
    }

    /// Per-device convergence across the given stores, or all of them.
    pub async fn convergence(&self, store_ids: &[StoreId]) -> SyncResult<ConvergenceReport> {
        let ids = if store_ids.is_empty() {
            self.store_ids()
        } else {
            store_ids.to_vec()
        };

        let mut sums = Vec::with_capacity(ids.len());
        for id in ids {
            let records = self.store(&id)?.list().await?;
            sums.push((id, checksum(&records)));
        }
        Ok(convergence_of_checksums(&sums))
    }

    fn active_session_for(&self, store_id: &str) -> Option<String> {
        self.registry
            .live()
            .into_iter()
            .find(|s| s.target_store_id == store_id)
            .map(|s| s.id)
    }

    /// The checkpoint of an interrupted sync into `store_id`, if any.
    pub async fn check_incomplete_sync(&self, store_id: &str) -> SyncResult<Option<RecoveryOffer>> {
        self.store(store_id)?;
        if self.active_session_for(store_id).is_some() {
            return Ok(None);
        }
        let checkpoint = self.checkpoints.load(store_id).await?;
        Ok(checkpoint.as_ref().map(RecoveryOffer::from))
    }

    /// Leave an interrupted sync into `store_id` the way `action` says.
    pub async fn recover(&self, store_id: &str, action: RecoveryAction) -> SyncResult<SyncSession> {
        let target = self.store(store_id)?;
        if let Some(active) = self.active_session_for(store_id) {
            return Err(SyncError::InvalidRequest(format!(
                "session {active} is still writing to {store_id}"
            )));
        }
        let checkpoint = self
            .checkpoints
            .load(store_id)
            .await?
            .ok_or_else(|| SyncError::NoCheckpoint(store_id.to_string()))?;
        let source = self.store(&checkpoint.source_store_id)?;

        tracing::info!(
            store_id,
            action = ?action,
            interrupted = %checkpoint.session_id,
            "Recovering interrupted sync"
        );

        let mut session = SyncSession::new(
            uuid::Uuid::new_v4().to_string(),
            checkpoint.source_store_id.clone(),
            store_id,
        );
        session.resumed_from = Some(checkpoint.session_id.clone());
        let allow_migration = checkpoint.allow_migration;

        let mode = match action {
            RecoveryAction::Continue => RunMode::Continue(checkpoint),
            RecoveryAction::Restart => {
                self.checkpoints.clear(store_id).await?;
                session.resumed_from = None;
                RunMode::Fresh
            }
            RecoveryAction::Rollback => {
                if checkpoint.target_backup.is_none() {
                    return Err(SyncError::InvalidRequest(
                        "the interrupted sync never reached IMPORTING; nothing to roll back"
                            .to_string(),
                    ));
                }
                RunMode::Rollback(checkpoint)
            }
        };

        Ok(self.spawn(session, source, target, allow_migration, mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBookStore, InMemoryCheckpointStore, InMemoryTransport};
    use shelfsync_engine::BookRecord;

    const TS: &str = "2024-05-01T12:00:00Z";

    fn service() -> SyncService {
        SyncService::new(
            Arc::new(InMemoryTransport::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            SyncSettings::default(),
        )
    }

    #[tokio::test]
    async fn start_rejects_unknown_and_identical_stores() {
        let service = service();
        service.register_store(Arc::new(InMemoryBookStore::new("laptop")));

        assert!(matches!(
            service.start("laptop", "laptop", StartOptions::default()),
            Err(SyncError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.start("laptop", "tablet", StartOptions::default()),
            Err(SyncError::UnknownStore(_))
        ));
    }

    #[tokio::test]
    async fn stats_break_down_by_status() {
        let service = service();
        service.register_store(Arc::new(InMemoryBookStore::new("laptop").with_records([
            BookRecord::new("a", "Dune", "Herbert", TS).with_status(ReadingStatus::Reading),
            BookRecord::new("b", "Emma", "Austen", TS).with_status(ReadingStatus::Reading),
            BookRecord::new("c", "Ulysses", "Joyce", TS),
        ])));

        let stats = service.stats("laptop").await.unwrap();
        assert_eq!(stats.record_count, 3);
        assert_eq!(stats.by_status[&ReadingStatus::Reading], 2);
        assert_eq!(stats.by_status[&ReadingStatus::Unread], 1);
        assert_eq!(stats.checksum.len(), 64);
        assert!(stats.active_session.is_none());
    }

    #[tokio::test]
    async fn unknown_sessions_are_reported() {
        let service = service();
        assert!(matches!(service.session("nope"), Err(SyncError::UnknownSession(_))));
        assert!(matches!(service.cancel("nope"), Err(SyncError::UnknownSession(_))));
        assert!(matches!(
            service.resolve_pending("nope", "b", StatusChoice::Local),
            Err(SyncError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn no_checkpoint_means_nothing_to_recover() {
        let service = service();
        service.register_store(Arc::new(InMemoryBookStore::new("phone")));

        assert!(service.check_incomplete_sync("phone").await.unwrap().is_none());
        assert!(matches!(
            service.recover("phone", RecoveryAction::Continue).await,
            Err(SyncError::NoCheckpoint(_))
        ));
    }
}
