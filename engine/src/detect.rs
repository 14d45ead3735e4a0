//! Conflict detection.
//!
//! # Algorithm
//!
//! 1. Drop duplicate ids inside each input set, keeping the latest entry
//! 2. Pair records by `id`
//! 3. Pair the remaining records by `crossDeviceId`, in id order
//! 4. Unpaired records become `Add` entries
//! 5. Paired records are compared group by group; equal pairs are `Noop`,
//!    the rest produce one [`ConflictRecord`] per differing group
//!
//! The plan is sorted by key, so the output never depends on input order.

use crate::{
    record::ValidatedRecord,
    strategy::{FieldGroup, Strategy},
    BookId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Which input set a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Local,
    Remote,
}

/// What to do with one key of the union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlanAction {
    /// Present on one side only; copied verbatim.
    Add { side: Side },
    /// Present on both sides with no differing field.
    Noop,
    /// Present on both sides with the listed groups differing.
    Conflict { groups: Vec<FieldGroup> },
}

/// One entry of the union plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    /// Id the merged record is stored under
    pub key: BookId,
    /// Index into the local input
    pub local: Option<usize>,
    /// Index into the remote input
    pub remote: Option<usize>,
    pub action: PlanAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One field-group divergence between two records sharing an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub book_id: BookId,
    pub group: FieldGroup,
    /// Names of the differing fields inside the group
    pub fields: Vec<String>,
    pub local_value: Value,
    pub remote_value: Value,
    pub severity: Severity,
    pub strategy_applied: Strategy,
    /// Filled in by the resolver
    pub resolved_value: Option<Value>,
    pub auto_resolved: bool,
}

/// An entry removed because its id repeats inside one input set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedDuplicate {
    pub side: Side,
    pub id: BookId,
    /// Index of the dropped entry
    pub index: usize,
    /// Index of the entry that was kept
    pub kept: usize,
}

/// Output of [`detect`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub plan: Vec<PlanEntry>,
    pub conflicts: Vec<ConflictRecord>,
    pub duplicates: Vec<DroppedDuplicate>,
}

/// Severity of a conflicting pair, from the set of differing groups.
pub fn severity(groups: &[FieldGroup]) -> Severity {
    if groups.contains(&FieldGroup::Status) || groups.len() >= 3 {
        Severity::High
    } else if !groups.is_empty() && groups.iter().all(FieldGroup::is_free_text) {
        Severity::Low
    } else {
        Severity::Medium
    }
}

/// Diff two validated record sets.
pub fn detect(local: &[ValidatedRecord], remote: &[ValidatedRecord]) -> Detection {
    let mut duplicates = Vec::new();
    let local_ids = dedupe(local, Side::Local, &mut duplicates);
    let remote_ids = dedupe(remote, Side::Remote, &mut duplicates);

    let mut pairs: Vec<(usize, usize)> = Vec::new();
    let mut local_rest: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut remote_rest: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

    for (id, &li) in &local_ids {
        match remote_ids.get(id) {
            Some(&ri) => pairs.push((li, ri)),
            None => local_rest
                .entry(local[li].record().cross_device_id.as_str())
                .or_default()
                .push(li),
        }
    }
    for (id, &ri) in &remote_ids {
        if !local_ids.contains_key(id) {
            remote_rest
                .entry(remote[ri].record().cross_device_id.as_str())
                .or_default()
                .push(ri);
        }
    }

    let mut plan = Vec::with_capacity(local_ids.len().max(remote_ids.len()));
    for (fp, lis) in &local_rest {
        let ris = remote_rest.remove(fp).unwrap_or_default();
        let matched = lis.len().min(ris.len());
        pairs.extend(lis.iter().copied().zip(ris.iter().copied()));
        plan.extend(lis[matched..].iter().map(|&li| add(local, li, Side::Local)));
        plan.extend(ris[matched..].iter().map(|&ri| add(remote, ri, Side::Remote)));
    }
    for ris in remote_rest.values() {
        plan.extend(ris.iter().map(|&ri| add(remote, ri, Side::Remote)));
    }

    let mut conflicts = Vec::new();
    for (li, ri) in pairs {
        let (l, r) = (local[li].record(), remote[ri].record());
        let key = l.id.as_str().min(r.id.as_str()).to_string();

        let groups: Vec<FieldGroup> = FieldGroup::ALL
            .into_iter()
            .filter(|g| !g.differing_fields(l, r).is_empty())
            .collect();

        let action = if groups.is_empty() {
            PlanAction::Noop
        } else {
            let severity = severity(&groups);
            conflicts.extend(groups.iter().map(|&group| {
                let strategy = group.default_strategy();
                ConflictRecord {
                    book_id: key.clone(),
                    group,
                    fields: group.differing_fields(l, r),
                    local_value: group.values(l),
                    remote_value: group.values(r),
                    severity,
                    strategy_applied: strategy,
                    resolved_value: None,
                    auto_resolved: strategy.is_automatic(),
                }
            }));
            PlanAction::Conflict { groups }
        };

        plan.push(PlanEntry {
            key,
            local: Some(li),
            remote: Some(ri),
            action,
        });
    }

    plan.sort_by(|a, b| a.key.cmp(&b.key));
    conflicts.sort_by(|a, b| a.book_id.cmp(&b.book_id).then(a.group.cmp(&b.group)));

    Detection {
        plan,
        conflicts,
        duplicates,
    }
}

fn add(records: &[ValidatedRecord], index: usize, side: Side) -> PlanEntry {
    let (local, remote) = match side {
        Side::Local => (Some(index), None),
        Side::Remote => (None, Some(index)),
    };
    PlanEntry {
        key: records[index].id().to_string(),
        local,
        remote,
        action: PlanAction::Add { side },
    }
}

/// Map each id to the entry that survives deduplication.
fn dedupe<'a>(
    records: &'a [ValidatedRecord],
    side: Side,
    dropped: &mut Vec<DroppedDuplicate>,
) -> BTreeMap<&'a str, usize> {
    let mut kept: BTreeMap<&str, usize> = BTreeMap::new();
    let mut losers = Vec::new();

    for (index, record) in records.iter().enumerate() {
        match kept.get_mut(record.id()) {
            None => {
                kept.insert(record.id(), index);
            }
            Some(current) => {
                if prefer(record, &records[*current]) {
                    losers.push(*current);
                    *current = index;
                } else {
                    losers.push(index);
                }
            }
        }
    }

    losers.sort_unstable();
    dropped.extend(losers.into_iter().map(|index| {
        let id = records[index].id();
        DroppedDuplicate {
            side,
            id: id.to_string(),
            index,
            kept: kept.get(id).copied().unwrap_or(index),
        }
    }));
    kept
}

/// Whether `candidate` should replace `current` among same-id entries.
fn prefer(candidate: &ValidatedRecord, current: &ValidatedRecord) -> bool {
    match candidate.modified().cmp(&current.modified()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            let a = crate::canonical::to_canonical_string(&candidate.record().to_json());
            let b = crate::canonical::to_canonical_string(&current.record().to_json());
            a < b
        }
    }
}
