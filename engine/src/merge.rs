//! Merge engine.
//!
//! Turns a [`crate::detect::Detection`] into the merged record set. `local` is the set being
//! written to; `remote` is the incoming one. Records whose status differs are
//! returned as [`PendingDecision`]s and keep their local version in the merged
//! set until a decision arrives; every other record is resolved here.
//!
//! Merging is idempotent: merging the result with the same remote set again
//! yields the same records.

use crate::{
    detect::{detect, ConflictRecord, PlanAction, Side},
    record::{BookRecord, ReadingStatus, ValidatedRecord},
    schema::{InvalidRecord, Validator},
    strategy::{order, Contender, FieldGroup},
    BookId, StoreId,
};
use serde::{Deserialize, Serialize};

/// Store ids of the two sides, used for tie-breaks and attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeContext {
    pub local_store_id: StoreId,
    pub remote_store_id: StoreId,
}

impl MergeContext {
    pub fn new(local_store_id: impl Into<StoreId>, remote_store_id: impl Into<StoreId>) -> Self {
        Self {
            local_store_id: local_store_id.into(),
            remote_store_id: remote_store_id.into(),
        }
    }
}

/// What happened to one record of the merged set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordOutcome {
    /// Only present remotely; copied in.
    Added,
    /// Both sides differed; resolved into a new local version.
    Updated,
    /// Both sides held the same content.
    SkippedDuplicate,
    /// Local version kept as is.
    Retained,
    /// Status conflict awaiting a decision; local version kept.
    Pending,
}

/// One record of the merged set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedRecord {
    pub record: BookRecord,
    pub outcome: RecordOutcome,
    /// Whether the local store must be written for this record
    pub needs_write: bool,
    /// Local id superseded by `record.id` after a cross-device match
    pub replaces: Option<BookId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub added: usize,
    pub updated: usize,
    pub skipped_duplicate: usize,
    pub conflicted: usize,
}

impl SyncCounts {
    /// Count one record outcome.
    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Added => self.added += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            RecordOutcome::Pending => self.conflicted += 1,
            RecordOutcome::Retained => {}
        }
    }

    /// A pending record was resolved.
    pub fn resolve_one(&mut self) {
        self.conflicted = self.conflicted.saturating_sub(1);
        self.updated += 1;
    }
}

/// A record held back because its status differs between the sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDecision {
    pub book_id: BookId,
    /// Local id the resolved record replaces, after a cross-device match
    pub replaces: Option<BookId>,
    pub local_status: ReadingStatus,
    pub remote_status: ReadingStatus,
    /// Record with every automatic group already resolved
    pub provisional: BookRecord,
    pub conflict: ConflictRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusChoice {
    Local,
    Remote,
}

/// Output of a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    /// Merged set, sorted by id
    pub records: Vec<MergedRecord>,
    pub counts: SyncCounts,
    pub conflicts: Vec<ConflictRecord>,
    pub pending_decisions: Vec<PendingDecision>,
    /// Local ids superseded by a cross-device match
    pub replaced_ids: Vec<BookId>,
    /// Entries rejected by validation, local side
    pub rejected_local: Vec<InvalidRecord>,
    /// Entries rejected by validation, remote side
    pub rejected_remote: Vec<InvalidRecord>,
}

impl MergeResult {
    /// The merged records without their outcomes.
    pub fn books(&self) -> Vec<BookRecord> {
        self.records.iter().map(|m| m.record.clone()).collect()
    }

    /// Records the local store must write, in id order.
    pub fn writes(&self) -> impl Iterator<Item = &MergedRecord> {
        self.records.iter().filter(|m| m.needs_write)
    }
}

/// Merge two validated record sets.
pub fn merge(
    local: &[ValidatedRecord],
    remote: &[ValidatedRecord],
    ctx: &MergeContext,
) -> MergeResult {
    let detection = detect(local, remote);
    let mut result = MergeResult {
        counts: SyncCounts {
            skipped_duplicate: detection.duplicates.len(),
            ..SyncCounts::default()
        },
        ..MergeResult::default()
    };
    let mut conflicts = detection.conflicts;

    for entry in &detection.plan {
        let merged = match (&entry.action, entry.local, entry.remote) {
            (PlanAction::Add { side: Side::Remote }, _, Some(ri)) => MergedRecord {
                record: remote[ri].record().clone(),
                outcome: RecordOutcome::Added,
                needs_write: true,
                replaces: None,
            },
            (PlanAction::Add { side: Side::Local }, Some(li), _) => MergedRecord {
                record: local[li].record().clone(),
                outcome: RecordOutcome::Retained,
                needs_write: false,
                replaces: None,
            },
            (action, Some(li), Some(ri)) => {
                let (l, r) = (&local[li], &remote[ri]);
                let lc = Contender::new(l, &ctx.local_store_id);
                let rc = Contender::new(r, &ctx.remote_store_id);
                let (earlier, later) = order(lc, rc);

                let mut out = later.record.clone();
                out.id = entry.key.clone();
                let replaces = (l.id() != entry.key).then(|| l.id().to_string());

                let groups: &[FieldGroup] = match action {
                    PlanAction::Conflict { groups } => groups.as_slice(),
                    _ => &[],
                };

                // Conflicts are sorted by book id, same as the plan.
                let start = conflicts.partition_point(|c| c.book_id < entry.key);
                let end = conflicts.partition_point(|c| c.book_id <= entry.key);
                let own = &mut conflicts[start..end];

                let mut needs_decision = false;
                for group in groups {
                    let strategy = group.default_strategy();
                    if strategy.apply(*group, &earlier, &later, &mut out) {
                        let resolved = group.values(&out);
                        for c in own.iter_mut().filter(|c| c.group == *group) {
                            c.resolved_value = Some(resolved.clone());
                        }
                    } else {
                        needs_decision = true;
                    }
                }

                if needs_decision {
                    // Local version stays until the decision arrives.
                    let conflict = own.iter().find(|c| c.group == FieldGroup::Status).cloned();
                    if let Some(conflict) = conflict {
                        result.pending_decisions.push(PendingDecision {
                            book_id: entry.key.clone(),
                            replaces: replaces.clone(),
                            local_status: l.record().status,
                            remote_status: r.record().status,
                            provisional: out,
                            conflict,
                        });
                    }
                    MergedRecord {
                        record: l.record().clone(),
                        outcome: RecordOutcome::Pending,
                        needs_write: false,
                        replaces: None,
                    }
                } else {
                    let unchanged = &out == l.record();
                    let outcome = match action {
                        PlanAction::Noop => RecordOutcome::SkippedDuplicate,
                        _ if unchanged => RecordOutcome::Retained,
                        _ => RecordOutcome::Updated,
                    };
                    if let Some(old) = &replaces {
                        result.replaced_ids.push(old.clone());
                    }
                    MergedRecord {
                        record: out,
                        outcome,
                        needs_write: !unchanged,
                        replaces,
                    }
                }
            }
            // The plan only pairs indices that exist.
            _ => continue,
        };

        result.counts.record(merged.outcome);
        result.records.push(merged);
    }

    result.records.sort_by(|a, b| a.record.id.cmp(&b.record.id));
    result.replaced_ids.sort();
    result.conflicts = conflicts;
    result
}

/// Validate both sides with the current schema, then merge.
///
/// Invalid entries are reported in `rejected_local` / `rejected_remote` and
/// never block the rest of the merge.
pub fn merge_records(local: &[BookRecord], remote: &[BookRecord], ctx: &MergeContext) -> MergeResult {
    let validator = Validator::new();
    let local = validator.validate_records(local);
    let remote = validator.validate_records(remote);

    let mut result = merge(&local.valid, &remote.valid, ctx);
    result.rejected_local = local.invalid;
    result.rejected_remote = remote.invalid;
    result
}

/// Final record for a pending decision.
pub fn resolve_pending(decision: &PendingDecision, choice: StatusChoice) -> BookRecord {
    let mut record = decision.provisional.clone();
    record.status = match choice {
        StatusChoice::Local => decision.local_status,
        StatusChoice::Remote => decision.remote_status,
    };
    record
}
