//! Pull and merge engine
//!
//! Folds a remote snapshot into the local store with one of three strategies:
//! additive sync, conflict-aware merge, or full replace. Each strategy is
//! planned from the current local rows and applied in the caller's
//! transaction, so a failure leaves the local store untouched.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::remote::{RemoteRecord, RemoteSnapshot};
use crate::db::RecordRepository;
use crate::error::{Error, Result};
use crate::models::{Collection, LocalId, OwnerId, Record, RemoteId, SyncConflict, SyncState};
use crate::util::now_millis;

/// Which copy wins a flagged conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    #[default]
    RemoteWins,
    LocalWins,
}

impl ConflictPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemoteWins => "remote-wins",
            Self::LocalWins => "local-wins",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote-wins" | "remote" => Ok(Self::RemoteWins),
            "local-wins" | "local" => Ok(Self::LocalWins),
            other => Err(Error::Validation(format!(
                "unknown conflict policy '{other}'"
            ))),
        }
    }
}

/// A local record with unpushed edits whose remote copy changed at nearly the
/// same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub collection: Collection,
    pub remote_id: RemoteId,
    /// Local copy as it was before the merge
    pub local: Record,
    pub remote: RemoteRecord,
}

impl Conflict {
    pub fn local_updated_at(&self) -> i64 {
        self.local.effective_updated_at()
    }

    pub fn remote_updated_at(&self) -> i64 {
        self.remote.effective_updated_at()
    }
}

/// Summary of a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Remote records copied in as new local records
    pub inserted: usize,
    /// Local records overwritten with their remote copy
    pub updated: usize,
    /// Local records removed
    pub deleted: usize,
    /// Conflicts flagged by a conflict-aware merge
    pub conflicts: Vec<Conflict>,
    /// Whether every local record of the owner was removed first
    pub cleared: bool,
}

/// Strategy used to reconcile a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Newest wins; remote deletions and an empty remote propagate
    Additive,
    /// Newest wins, except near-simultaneous edits of pending records
    ConflictAware {
        policy: ConflictPolicy,
        tolerance_ms: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MergeStep {
    Insert(Collection, RemoteRecord),
    Overwrite(Collection, LocalId, RemoteRecord),
    Delete(Collection, LocalId),
}

#[derive(Debug, Default)]
struct MergePlan {
    clear_all: bool,
    steps: Vec<MergeStep>,
    conflicts: Vec<Conflict>,
}

/// Decide what a merge changes, without touching storage.
fn plan_merge(
    local: &HashMap<Collection, Vec<Record>>,
    remote: &RemoteSnapshot,
    mode: MergeMode,
) -> MergePlan {
    let mut plan = MergePlan::default();

    if mode == MergeMode::Additive && remote.is_empty() {
        plan.clear_all = true;
        return plan;
    }

    for collection in Collection::ALL {
        let local_records = local.get(&collection).map_or(&[][..], Vec::as_slice);
        let by_remote_id: HashMap<&RemoteId, &Record> = local_records
            .iter()
            .filter_map(|record| record.remote_id.as_ref().map(|id| (id, record)))
            .collect();

        let mut seen = HashSet::new();
        for remote_record in remote.records(collection) {
            if !seen.insert(&remote_record.remote_id) {
                tracing::warn!(
                    "Ignoring duplicate remote {} {}",
                    collection.singular(),
                    remote_record.remote_id
                );
                continue;
            }

            let Some(local_record) = by_remote_id.get(&remote_record.remote_id) else {
                plan.steps
                    .push(MergeStep::Insert(collection, remote_record.clone()));
                continue;
            };

            let local_at = local_record.effective_updated_at();
            let remote_at = remote_record.effective_updated_at();

            if let MergeMode::ConflictAware {
                policy,
                tolerance_ms,
            } = mode
            {
                if local_record.sync_state == SyncState::Local
                    && remote_at.abs_diff(local_at) < tolerance_ms.unsigned_abs()
                {
                    tracing::debug!(
                        "Conflict on {} {} ({local_at} vs {remote_at}), {policy}",
                        collection.singular(),
                        local_record.local_id
                    );
                    plan.conflicts.push(Conflict {
                        collection,
                        remote_id: remote_record.remote_id.clone(),
                        local: (*local_record).clone(),
                        remote: remote_record.clone(),
                    });
                    if policy == ConflictPolicy::RemoteWins {
                        plan.steps.push(MergeStep::Overwrite(
                            collection,
                            local_record.local_id,
                            remote_record.clone(),
                        ));
                    }
                    continue;
                }
            }

            if remote_at > local_at {
                plan.steps.push(MergeStep::Overwrite(
                    collection,
                    local_record.local_id,
                    remote_record.clone(),
                ));
            }
        }

        for local_record in local_records {
            let Some(remote_id) = &local_record.remote_id else {
                continue;
            };
            if seen.contains(remote_id) {
                continue;
            }
            // A conflict-aware merge keeps pending local edits of remotely deleted records
            let removable = match mode {
                MergeMode::Additive => true,
                MergeMode::ConflictAware { .. } => local_record.sync_state == SyncState::Synced,
            };
            if removable {
                plan.steps
                    .push(MergeStep::Delete(collection, local_record.local_id));
            }
        }
    }

    plan
}

fn apply_plan(
    repo: &impl RecordRepository,
    owner: &OwnerId,
    plan: MergePlan,
    mode: MergeMode,
) -> Result<MergeOutcome> {
    let mut outcome = MergeOutcome::default();

    if plan.clear_all {
        outcome.deleted = repo.delete_all(owner)?;
        outcome.cleared = true;
    }

    for step in plan.steps {
        match step {
            MergeStep::Insert(collection, remote) => {
                repo.insert_synced(collection, owner, &remote)?;
                outcome.inserted += 1;
            }
            MergeStep::Overwrite(collection, local_id, remote) => {
                repo.overwrite_from_remote(collection, local_id, owner, &remote)?;
                outcome.updated += 1;
            }
            MergeStep::Delete(collection, local_id) => {
                if repo.hard_delete(collection, local_id, owner)? {
                    outcome.deleted += 1;
                }
            }
        }
    }

    if let MergeMode::ConflictAware { policy, .. } = mode {
        let resolved_at = now_millis();
        for conflict in &plan.conflicts {
            repo.record_conflict(&SyncConflict {
                id: 0,
                owner_id: owner.clone(),
                collection: conflict.collection,
                local_id: conflict.local.local_id,
                remote_id: conflict.remote_id.clone(),
                local_updated_at: conflict.local_updated_at(),
                remote_updated_at: conflict.remote_updated_at(),
                resolved_at,
                policy: policy.as_str().to_string(),
            })?;
        }
    }
    outcome.conflicts = plan.conflicts;

    Ok(outcome)
}

/// Reconcile an owner's local records with a remote snapshot.
///
/// Must run inside a transaction; an error leaves nothing applied.
pub(crate) fn reconcile(
    repo: &impl RecordRepository,
    owner: &OwnerId,
    remote: &RemoteSnapshot,
    mode: MergeMode,
) -> Result<MergeOutcome> {
    let mut local = HashMap::new();
    for collection in Collection::ALL {
        repo.normalize_timestamps(collection, owner)?;
        local.insert(collection, repo.list_all(collection, owner)?);
    }

    let plan = plan_merge(&local, remote, mode);
    let outcome = apply_plan(repo, owner, plan, mode)?;
    tracing::info!(
        "Merged remote snapshot for {owner}: {} inserted, {} updated, {} deleted, {} conflict(s){}",
        outcome.inserted,
        outcome.updated,
        outcome.deleted,
        outcome.conflicts.len(),
        if outcome.cleared { ", local data cleared" } else { "" }
    );
    Ok(outcome)
}

/// Replace every local record of an owner with the remote snapshot.
pub(crate) fn replace_all(
    repo: &impl RecordRepository,
    owner: &OwnerId,
    remote: &RemoteSnapshot,
) -> Result<MergeOutcome> {
    let deleted = repo.delete_all(owner)?;
    let mut inserted = 0;
    for collection in Collection::ALL {
        let mut seen = HashSet::new();
        for record in remote.records(collection) {
            if seen.insert(&record.remote_id) {
                repo.insert_synced(collection, owner, record)?;
                inserted += 1;
            }
        }
    }

    tracing::info!("Replaced local data for {owner}: {deleted} removed, {inserted} copied from remote");
    Ok(MergeOutcome {
        inserted,
        deleted,
        cleared: true,
        ..MergeOutcome::default()
    })
}
