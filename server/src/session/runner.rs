//! Drives one session through its phases.
//!
//! The runner owns the session's working set. It talks to storage and
//! transport only through the ports in [`SessionContext`] and reports
//! through the [`SessionRegistry`]. Cancellation is observed between batches
//! and while waiting on a decision; a batch in flight always completes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use shelfsync_engine::{
    check_compatible, import, merge, resolve_pending, verify,
    version::{migrate_value, parse_version},
    BookRecord, Compatibility, ExportFile, InvalidRecord, MergeContext, MergeResult,
    PendingDecision, RecordOutcome, SchemaError, SchemaErrorKind, StatusChoice, SyncCounts,
    Validator, Verification, VerifyConfig,
};
use tokio::sync::{mpsc, watch};

use super::{
    Checkpoint, CheckpointPhase, ProgressTracker, RetryPolicy, SessionEvent, SessionRegistry,
    SessionState,
};
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::ports::{BookStore, CheckpointStore, Transport};

/// A status choice for one pending record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub book_id: String,
    pub choice: StatusChoice,
}

/// How the session starts.
#[derive(Debug, Clone)]
pub enum RunMode {
    Fresh,
    /// Resume an interrupted session from its checkpoint
    Continue(Checkpoint),
    /// Restore the target from the checkpoint's backup
    Rollback(Checkpoint),
}

/// Everything a runner needs, handed down by the service.
pub struct SessionContext {
    pub session_id: String,
    pub source: Arc<dyn BookStore>,
    pub target: Arc<dyn BookStore>,
    pub transport: Arc<dyn Transport>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub registry: Arc<SessionRegistry>,
    pub settings: SyncSettings,
    pub allow_migration: bool,
    pub mode: RunMode,
    pub cancel: watch::Receiver<bool>,
    pub decisions: mpsc::UnboundedReceiver<Decision>,
}

enum Finish {
    Completed,
    Cancelled,
}

/// Which validator reads both sides, and whether source records migrate first.
struct VersionPlan {
    validator: Validator,
    migrate: bool,
}

pub struct SessionRunner {
    ctx: SessionContext,
    progress: ProgressTracker,
    /// Set once the target's checkpoint belongs to this run.
    owns_checkpoint: bool,
}

impl SessionRunner {
    pub fn new(ctx: SessionContext) -> Self {
        let progress = ProgressTracker::new(ctx.settings.progress_interval);
        Self {
            ctx,
            progress,
            owns_checkpoint: false,
        }
    }

    /// Run to a terminal state and return it.
    pub async fn run(mut self) -> SessionState {
        let id = self.ctx.session_id.clone();
        let outcome = match self.ctx.mode.clone() {
            RunMode::Rollback(checkpoint) => self.rollback(checkpoint).await,
            RunMode::Continue(checkpoint) => self.drive(Some(checkpoint)).await,
            RunMode::Fresh => self.drive(None).await,
        };

        let final_state = match outcome {
            Ok(Finish::Completed) => self.complete().await,
            Ok(Finish::Cancelled) => self.cancelled().await,
            Err(err) => self.fail(err).await,
        };
        self.ctx.registry.archive(&id).await;
        final_state
    }

    fn is_cancelled(&self) -> bool {
        *self.ctx.cancel.borrow()
    }

    fn transition(&self, to: SessionState) -> SyncResult<()> {
        self.ctx.registry.transition(&self.ctx.session_id, to)
    }

    fn report_progress(&mut self, state: SessionState, processed: usize, total: usize, force: bool) {
        let (progress, emit) = if force {
            (self.progress.force(state, processed, total), true)
        } else {
            let update = self.progress.update(state, processed, total);
            (update.progress, update.emit)
        };

        self.ctx
            .registry
            .update(&self.ctx.session_id, |s| s.progress = progress);
        if emit {
            self.ctx.registry.publish(SessionEvent::Progress {
                session_id: self.ctx.session_id.clone(),
                state,
                percentage: progress.percentage,
                processed_count: progress.processed_count,
                total_count: progress.total_count,
            });
        }
    }

    async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> SyncResult<()> {
        self.ctx.checkpoints.save(checkpoint).await?;
        self.owns_checkpoint = true;
        Ok(())
    }

    fn counts(&self) -> SyncCounts {
        self.ctx
            .registry
            .get(&self.ctx.session_id)
            .map(|s| s.counts)
            .unwrap_or_default()
    }

    async fn drive(&mut self, resume: Option<Checkpoint>) -> SyncResult<Finish> {
        // Cancelled while queued behind another session.
        if self.is_cancelled() {
            return Ok(Finish::Cancelled);
        }
        let allow_migration = resume
            .as_ref()
            .map_or(self.ctx.allow_migration, |c| c.allow_migration);

        if let Some(checkpoint) = &resume {
            self.transition(SessionState::Recovering)?;
            tracing::info!(
                session_id = %self.ctx.session_id,
                resumed_from = %checkpoint.session_id,
                phase = ?checkpoint.phase,
                "Resuming interrupted sync"
            );
            let counts = checkpoint.counts;
            self.ctx.registry.update(&self.ctx.session_id, |s| s.counts = counts);
        }

        // PREPARING
        self.transition(SessionState::Preparing)?;
        if self.is_cancelled() {
            return Ok(Finish::Cancelled);
        }
        let source_version = self.ctx.source.schema_version().await?;
        let target_version = self.ctx.target.schema_version().await?;
        let plan = self.prepare(&source_version, &target_version, allow_migration)?;
        self.report_progress(SessionState::Preparing, 0, 0, true);

        let resumed_import = resume.filter(|c| {
            c.phase == CheckpointPhase::Importing && c.payload.is_some()
        });

        let checkpoint = match resumed_import {
            Some(mut checkpoint) => {
                checkpoint.session_id = self.ctx.session_id.clone();
                checkpoint.saved_at = Utc::now();
                self.save_checkpoint(&checkpoint).await?;
                checkpoint
            }
            None => match self.export_and_transfer(&source_version, allow_migration).await? {
                Some(checkpoint) => checkpoint,
                None => return Ok(Finish::Cancelled),
            },
        };

        // IMPORTING
        self.transition(SessionState::Importing)?;
        if self.is_cancelled() {
            return Ok(Finish::Cancelled);
        }
        self.import_and_merge(checkpoint, &plan).await
    }

    fn prepare(
        &self,
        source_version: &str,
        target_version: &str,
        allow_migration: bool,
    ) -> SyncResult<VersionPlan> {
        let source = parse_version(source_version)?;
        let target = parse_version(target_version)?;

        match check_compatible(source_version, target_version)? {
            Compatibility::Compatible { defaults } => {
                let newest = if source > target { source_version } else { target_version };
                tracing::debug!(
                    session_id = %self.ctx.session_id,
                    source_version,
                    target_version,
                    minor_steps = defaults.len(),
                    "Schema versions compatible"
                );
                Ok(VersionPlan {
                    validator: Validator::for_version(newest)?,
                    migrate: false,
                })
            }
            Compatibility::Incompatible {
                reason,
                required_migration_path,
            } => {
                let upgradable = source < target && !required_migration_path.is_empty();
                if allow_migration && upgradable {
                    tracing::info!(
                        session_id = %self.ctx.session_id,
                        source_version,
                        target_version,
                        "Migrating source records before merge"
                    );
                    Ok(VersionPlan {
                        validator: Validator::for_version(target_version)?,
                        migrate: true,
                    })
                } else {
                    Err(SyncError::VersionIncompatible {
                        source_version: source_version.to_string(),
                        target_version: target_version.to_string(),
                        reason,
                        required_migration_path: required_migration_path
                            .iter()
                            .map(ToString::to_string)
                            .collect(),
                    })
                }
            }
        }
    }

    /// EXPORTING and TRANSFERRING. Returns the IMPORTING checkpoint, or
    /// `None` when cancelled.
    async fn export_and_transfer(
        &mut self,
        source_version: &str,
        allow_migration: bool,
    ) -> SyncResult<Option<Checkpoint>> {
        let session = self
            .ctx
            .registry
            .get(&self.ctx.session_id)
            .ok_or_else(|| SyncError::UnknownSession(self.ctx.session_id.clone()))?;

        self.save_checkpoint(&Checkpoint::new(&session, CheckpointPhase::Exporting, allow_migration))
            .await?;

        // EXPORTING
        self.transition(SessionState::Exporting)?;
        if self.is_cancelled() {
            return Ok(None);
        }
        let records = self.ctx.source.list().await?;
        let count = records.len();
        let bytes = ExportFile::new(records, source_version, Utc::now()).to_bytes()?;
        tracing::debug!(
            session_id = %self.ctx.session_id,
            records = count,
            bytes = bytes.len(),
            "Exported source library"
        );
        self.report_progress(SessionState::Exporting, count, count, true);

        // TRANSFERRING
        self.transition(SessionState::Transferring)?;
        if self.is_cancelled() {
            return Ok(None);
        }
        let transport = &*self.ctx.transport;
        let channel = self.ctx.session_id.as_str();
        let payload = bytes.as_slice();
        let received = RetryPolicy::from_settings(&self.ctx.settings)
            .run("transfer", move |_| async move {
                transport.write_bytes(channel, payload).await?;
                transport.read_bytes(channel).await
            })
            .await?;
        self.report_progress(SessionState::Transferring, count, count, true);

        if self.is_cancelled() {
            return Ok(None);
        }

        // The payload must parse and match its checksum before it is kept.
        import(&received)?;
        let payload = String::from_utf8(received)
            .map_err(|e| SyncError::Internal(format!("payload is not UTF-8: {e}")))?;

        // Checkpoint before IMPORTING, with a backup of the target.
        let backup = self.ctx.target.list().await?;
        let mut checkpoint = Checkpoint::new(&session, CheckpointPhase::Importing, allow_migration);
        checkpoint.payload = Some(payload);
        checkpoint.target_backup = Some(backup);
        self.save_checkpoint(&checkpoint).await?;
        Ok(Some(checkpoint))
    }

    async fn import_and_merge(
        &mut self,
        mut checkpoint: Checkpoint,
        plan: &VersionPlan,
    ) -> SyncResult<Finish> {
        let session_id = self.ctx.session_id.clone();
        let payload = checkpoint.payload.clone().unwrap_or_default();

        // Integrity first; nothing is written on failure.
        let imported = import(payload.as_bytes())?;
        let mut unmigrated = Vec::new();
        let mut positions = Vec::with_capacity(imported.books.len());
        let mut raw: Vec<Value> = Vec::with_capacity(imported.books.len());
        let target = plan.validator.target().clone();
        for (index, book) in imported.books.into_iter().enumerate() {
            if !plan.migrate {
                positions.push(index);
                raw.push(book);
                continue;
            }
            match migrate_value(&book, &target) {
                Ok(migrated) => {
                    positions.push(index);
                    raw.push(migrated);
                }
                Err(err) => unmigrated.push(InvalidRecord {
                    index,
                    id: book.get("id").and_then(Value::as_str).map(str::to_string),
                    error: SchemaError::new(
                        SchemaErrorKind::UnsupportedVersion,
                        "schemaVersion",
                        err.to_string(),
                    ),
                }),
            }
        }

        let mut incoming = plan.validator.validate_batch(&raw);
        for invalid in &mut incoming.invalid {
            invalid.index = positions[invalid.index];
        }
        incoming.invalid.extend(unmigrated);
        incoming.invalid.sort_by_key(|invalid| invalid.index);
        let current = self.ctx.target.list().await?;
        let existing = plan.validator.validate_records(&current);

        let ctx = MergeContext::new(
            self.ctx.target.store_id().to_string(),
            self.ctx.source.store_id().to_string(),
        );
        let mut result = merge(&existing.valid, &incoming.valid, &ctx);
        result.rejected_local = existing.invalid;
        result.rejected_remote = incoming.invalid;

        if !result.rejected_remote.is_empty() || !result.rejected_local.is_empty() {
            tracing::warn!(
                session_id = %session_id,
                rejected_source = result.rejected_remote.len(),
                rejected_target = result.rejected_local.len(),
                "Records failed validation and were left out of the merge"
            );
        }
        let rejected = result.rejected_remote.clone();
        let conflicts = result.conflicts.clone();
        self.ctx.registry.update(&session_id, |s| {
            s.rejected = rejected;
            s.conflicts = conflicts;
        });

        let fresh = checkpoint.last_committed_id.is_none();
        if let Some(Finish::Cancelled) = self.commit_batches(&result, &mut checkpoint, fresh).await? {
            return Ok(Finish::Cancelled);
        }

        let mut resolved = Vec::new();
        if !result.pending_decisions.is_empty() {
            match self.await_decisions(result.pending_decisions.clone()).await? {
                Some(records) => resolved = records,
                None => return Ok(Finish::Cancelled),
            }
        }

        // VERIFYING
        self.transition(SessionState::Verifying)?;
        if self.is_cancelled() {
            return Ok(Finish::Cancelled);
        }
        let expected = planned_contents(current, &result, &resolved);
        let actual = self.ctx.target.list().await?;
        let config = VerifyConfig {
            sampling_threshold: self.ctx.settings.sampling_threshold,
            sample_size: self.ctx.settings.sample_size,
        };
        let verification = verify(&expected, &actual, &config);
        self.report_progress(SessionState::Verifying, actual.len(), actual.len(), true);

        let clean = verification.is_clean();
        let integrity = verification.integrity_percent();
        let mismatched = match &verification {
            Verification::Full { mismatched, .. } | Verification::Sampled { mismatched, .. } => {
                mismatched.clone()
            }
        };
        self.ctx
            .registry
            .update(&session_id, |s| s.verification = Some(verification));

        if !clean {
            return Err(SyncError::VerificationFailed {
                integrity_percent: integrity,
                mismatched,
            });
        }
        Ok(Finish::Completed)
    }

    /// Write the merged set in batches. Returns `Some(Cancelled)` when a
    /// cancel was observed before a batch started.
    async fn commit_batches(
        &mut self,
        result: &MergeResult,
        checkpoint: &mut Checkpoint,
        fresh: bool,
    ) -> SyncResult<Option<Finish>> {
        let session_id = self.ctx.session_id.clone();
        let batch_size = self.ctx.settings.batch_size.max(1);
        let total = result.records.len();

        let noop = result
            .records
            .iter()
            .filter(|r| r.outcome == RecordOutcome::SkippedDuplicate)
            .count();
        // In-store duplicate drops count once, with the first batch.
        let mut dropped = if fresh {
            result.counts.skipped_duplicate.saturating_sub(noop)
        } else {
            0
        };

        let remaining: Vec<_> = result
            .records
            .iter()
            .filter(|r| !checkpoint.is_committed(&r.record.id))
            .collect();
        let mut processed = total - remaining.len();

        for (batch_no, batch) in remaining.chunks(batch_size).enumerate() {
            if self.is_cancelled() {
                tracing::info!(session_id = %session_id, batch = batch_no + 1, "Cancel observed before batch");
                return Ok(Some(Finish::Cancelled));
            }

            let mut batch_counts = SyncCounts {
                skipped_duplicate: std::mem::take(&mut dropped),
                ..Default::default()
            };
            for merged in batch {
                if merged.needs_write {
                    self.ctx.target.put(&merged.record).await?;
                }
                if let Some(old) = &merged.replaces {
                    self.ctx.target.delete(old).await?;
                }
                batch_counts.record(merged.outcome);
            }

            let mut counts = SyncCounts::default();
            self.ctx.registry.update(&session_id, |s| {
                s.counts.added += batch_counts.added;
                s.counts.updated += batch_counts.updated;
                s.counts.skipped_duplicate += batch_counts.skipped_duplicate;
                s.counts.conflicted += batch_counts.conflicted;
                counts = s.counts;
            });

            processed += batch.len();
            checkpoint.counts = counts;
            checkpoint.last_committed_id = batch.last().map(|m| m.record.id.clone());
            checkpoint.saved_at = Utc::now();
            self.save_checkpoint(checkpoint).await?;

            tracing::debug!(
                session_id = %session_id,
                batch = batch_no + 1,
                records = batch.len(),
                processed,
                total,
                "Batch committed"
            );
            self.report_progress(SessionState::Importing, processed, total, false);
        }

        if dropped > 0 {
            self.ctx
                .registry
                .update(&session_id, |s| s.counts.skipped_duplicate += dropped);
        }
        self.report_progress(SessionState::Importing, total, total, true);
        Ok(None)
    }

    /// Wait for a choice on every pending record. Returns the written
    /// records, or `None` when cancelled.
    async fn await_decisions(
        &mut self,
        mut pending: Vec<PendingDecision>,
    ) -> SyncResult<Option<Vec<BookRecord>>> {
        let session_id = self.ctx.session_id.clone();
        self.ctx.registry.set_pending(&session_id, pending.clone());
        self.ctx
            .registry
            .update(&session_id, |s| s.awaiting_decision = true);
        for decision in &pending {
            self.ctx.registry.publish(SessionEvent::PendingDecision {
                session_id: session_id.clone(),
                decision: decision.clone(),
            });
        }
        tracing::info!(
            session_id = %session_id,
            pending = pending.len(),
            "Waiting for status decisions"
        );

        let mut written = Vec::new();
        while !pending.is_empty() {
            let decision = tokio::select! {
                decision = self.ctx.decisions.recv() => decision,
                _ = cancel_requested(&mut self.ctx.cancel) => return Ok(None),
            };
            let Some(decision) = decision else {
                return Err(SyncError::Internal("decision channel closed".to_string()));
            };
            let Some(pos) = pending.iter().position(|d| d.book_id == decision.book_id) else {
                tracing::warn!(session_id = %session_id, book_id = %decision.book_id, "Decision for unknown record ignored");
                continue;
            };

            let entry = pending.remove(pos);
            let record = resolve_pending(&entry, decision.choice);
            self.ctx.target.put(&record).await?;
            if let Some(old) = &entry.replaces {
                self.ctx.target.delete(old).await?;
            }
            self.ctx.registry.update(&session_id, |s| s.counts.resolve_one());
            self.ctx.registry.remove_pending(&session_id, &entry.book_id);
            tracing::info!(
                session_id = %session_id,
                book_id = %entry.book_id,
                choice = ?decision.choice,
                "Pending decision applied"
            );
            written.push(record);
        }

        self.ctx
            .registry
            .update(&session_id, |s| s.awaiting_decision = false);
        Ok(Some(written))
    }

    async fn rollback(&mut self, checkpoint: Checkpoint) -> SyncResult<Finish> {
        self.owns_checkpoint = true;
        self.transition(SessionState::Recovering)?;
        let backup = checkpoint.target_backup.ok_or_else(|| {
            SyncError::InvalidRequest("checkpoint holds no backup to roll back to".to_string())
        })?;

        let keep: BTreeMap<&str, &BookRecord> = backup.iter().map(|r| (r.id.as_str(), r)).collect();
        for record in self.ctx.target.list().await? {
            if !keep.contains_key(record.id.as_str()) {
                self.ctx.target.delete(&record.id).await?;
            }
        }
        for record in &backup {
            self.ctx.target.put(record).await?;
        }
        tracing::info!(
            session_id = %self.ctx.session_id,
            restored = backup.len(),
            "Target restored from checkpoint backup"
        );
        Ok(Finish::Cancelled)
    }

    async fn complete(&mut self) -> SessionState {
        let session_id = self.ctx.session_id.clone();
        if let Err(err) = self.transition(SessionState::Completed) {
            return self.fail(err).await;
        }
        self.report_progress(SessionState::Completed, 0, 0, true);
        self.clear_checkpoint().await;

        let mut integrity = 100.0;
        self.ctx.registry.update(&session_id, |s| {
            s.completed_at = Some(Utc::now());
            if let Some(v) = &s.verification {
                integrity = v.integrity_percent();
            }
        });
        let counts = self.counts();
        tracing::info!(
            session_id = %session_id,
            added = counts.added,
            updated = counts.updated,
            skipped_duplicate = counts.skipped_duplicate,
            conflicted = counts.conflicted,
            "Sync completed"
        );
        self.ctx.registry.publish(SessionEvent::Completed {
            session_id,
            counts,
            integrity_percent: integrity,
        });
        SessionState::Completed
    }

    async fn cancelled(&mut self) -> SessionState {
        let session_id = self.ctx.session_id.clone();
        if let Err(err) = self.transition(SessionState::Cancelled) {
            tracing::error!(session_id = %session_id, error = %err, "Cancel transition failed");
        }
        self.clear_checkpoint().await;
        self.ctx.registry.update(&session_id, |s| {
            s.completed_at = Some(Utc::now());
            s.awaiting_decision = false;
        });
        let counts = self.counts();
        tracing::info!(session_id = %session_id, added = counts.added, "Sync cancelled");
        self.ctx
            .registry
            .publish(SessionEvent::Cancelled { session_id, counts });
        SessionState::Cancelled
    }

    /// The checkpoint is kept so the failure can be recovered from.
    async fn fail(&mut self, err: SyncError) -> SessionState {
        let session_id = self.ctx.session_id.clone();
        let report = err.report();
        tracing::error!(session_id = %session_id, code = %report.code, error = %err, "Sync failed");

        if let Err(e) = self.transition(SessionState::Failed) {
            tracing::error!(session_id = %session_id, error = %e, "Failed transition rejected");
        }
        let stored = report.clone();
        self.ctx.registry.update(&session_id, |s| {
            s.completed_at = Some(Utc::now());
            s.awaiting_decision = false;
            s.failure = Some(stored);
        });
        self.ctx
            .registry
            .publish(SessionEvent::Failed { session_id, report });
        SessionState::Failed
    }

    /// Clears only a checkpoint this run saved or recovered from; an earlier
    /// session's checkpoint survives a cancel that never reached EXPORTING.
    async fn clear_checkpoint(&mut self) {
        if !self.owns_checkpoint {
            return;
        }
        let target = self.ctx.target.store_id().to_string();
        if let Err(err) = self.ctx.checkpoints.clear(&target).await {
            tracing::warn!(store_id = %target, error = %err, "Could not clear checkpoint");
        }
    }
}

/// Resolves once the cancel flag is set. Never resolves if the flag's
/// sender is gone.
async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// What the target should hold after the session: its contents before the
/// import, with the merge's writes, deletions and resolutions applied.
fn planned_contents(
    before: Vec<BookRecord>,
    result: &MergeResult,
    resolved: &[BookRecord],
) -> Vec<BookRecord> {
    let mut planned: BTreeMap<String, BookRecord> =
        before.into_iter().map(|r| (r.id.clone(), r)).collect();

    for merged in &result.records {
        if let Some(old) = &merged.replaces {
            planned.remove(old);
        }
        if merged.needs_write {
            planned.insert(merged.record.id.clone(), merged.record.clone());
        }
    }
    for decision in &result.pending_decisions {
        if let Some(old) = &decision.replaces {
            planned.remove(old);
        }
    }
    for record in resolved {
        planned.insert(record.id.clone(), record.clone());
    }
    planned.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfsync_engine::{merge_records, ReadingStatus};

    const T1: &str = "2024-01-01T00:00:00Z";
    const T2: &str = "2024-02-01T00:00:00Z";

    #[test]
    fn planned_contents_applies_writes_and_replacements() {
        let target = vec![
            BookRecord::new("a", "Dune", "Herbert", T1),
            BookRecord::new("z-emma", "Emma", "Austen", T1),
        ];
        let source = vec![
            BookRecord::new("b", "Ulysses", "Joyce", T1),
            BookRecord::new("e-emma", "Emma", "Austen", T2).with_progress(30),
        ];
        let result = merge_records(&target, &source, &MergeContext::new("phone", "laptop"));

        let planned = planned_contents(target, &result, &[]);
        let ids: Vec<&str> = planned.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "e-emma"]);
        assert_eq!(planned[2].progress, 30);
    }

    #[test]
    fn planned_contents_includes_resolutions() {
        let target = vec![BookRecord::new("a", "Dune", "Herbert", T1).with_status(ReadingStatus::Reading)];
        let source = vec![BookRecord::new("a", "Dune", "Herbert", T1).with_status(ReadingStatus::OnHold)];
        let result = merge_records(&target, &source, &MergeContext::new("phone", "laptop"));
        let decision = &result.pending_decisions[0];
        let resolved = resolve_pending(decision, StatusChoice::Remote);

        let planned = planned_contents(target, &result, &[resolved]);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].status, ReadingStatus::OnHold);
    }

    #[tokio::test]
    async fn cancelled_resolves_on_flag() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { cancel_requested(&mut rx).await });
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }
}
