//! Push engine
//!
//! Drains pending local records into the remote store. Each record is pushed
//! independently: a failure is reported for that record and the rest carry on.
//! Local reconciliation (binding remote ids, removing confirmed tombstones) is
//! returned as batch operations for the caller to apply.

use serde::{Deserialize, Serialize};

use super::remote::RemoteStore;
use crate::batch::BatchOp;
use crate::models::{
    Collection, LocalId, OwnerId, PendingSync, Record, RecordPatch, RemoteId, SyncState,
};

/// What happened to a pushed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushAction {
    /// Created remotely and bound to its new remote id
    Created,
    /// Edits of an already synced record sent to the remote copy
    Updated,
    /// Deleted remotely and removed locally
    Deleted,
    /// Never-synced tombstone removed locally without a remote call
    DiscardedLocal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedItem {
    pub collection: Collection,
    pub local_id: LocalId,
    pub remote_id: Option<RemoteId>,
    pub action: PushAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPush {
    pub collection: Collection,
    pub local_id: LocalId,
    pub error: String,
    /// Whether retrying the push may succeed
    pub retryable: bool,
}

/// Outcome of a push, partitioned per record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    pub succeeded: Vec<PushedItem>,
    pub failed: Vec<FailedPush>,
    /// Best-effort steps that failed without failing their record
    pub warnings: Vec<String>,
}

impl PushReport {
    /// Whether every pending record was reconciled
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn succeed(&mut self, record: &Record, remote_id: Option<RemoteId>, action: PushAction) {
        self.succeeded.push(PushedItem {
            collection: record.collection(),
            local_id: record.local_id,
            remote_id,
            action,
        });
    }

    fn fail(&mut self, record: &Record, error: &crate::Error) {
        tracing::warn!(
            "Failed to push {} {}: {}",
            record.collection().singular(),
            record.local_id,
            error
        );
        self.failed.push(FailedPush {
            collection: record.collection(),
            local_id: record.local_id,
            error: error.to_string(),
            retryable: error.is_retryable(),
        });
    }
}

/// Push every pending record and collect the local reconciliation to apply.
pub(crate) async fn push_pending<R: RemoteStore>(
    remote: &R,
    owner: &OwnerId,
    pending: PendingSync,
) -> (PushReport, Vec<BatchOp>) {
    let mut report = PushReport::default();
    let mut ops = Vec::with_capacity(pending.len());

    for record in &pending.creates_and_edits {
        let collection = record.collection();
        let pushed = match &record.remote_id {
            None => remote
                .create_remote(collection, owner, &record.fields)
                .await
                .map(|remote_id| (remote_id, PushAction::Created)),
            Some(remote_id) => remote
                .update_remote(collection, owner, remote_id, &record.fields)
                .await
                .map(|()| (remote_id.clone(), PushAction::Updated)),
        };

        let (remote_id, action) = match pushed {
            Ok(pushed) => pushed,
            Err(error) => {
                report.fail(record, &error);
                continue;
            }
        };

        if let Err(error) = remote
            .update_remote_sync_state(collection, owner, &remote_id, SyncState::Synced)
            .await
        {
            tracing::warn!("Remote sync-state update for {remote_id} failed: {error}");
            report
                .warnings
                .push(format!("sync state of {remote_id} not acknowledged: {error}"));
        }

        ops.push(BatchOp::Update {
            collection,
            local_id: record.local_id,
            owner: owner.clone(),
            patch: RecordPatch::mark_synced(remote_id.clone()),
        });
        report.succeed(record, Some(remote_id), action);
    }

    for record in &pending.deletes {
        let collection = record.collection();
        let action = match &record.remote_id {
            Some(remote_id) => match remote.delete_remote(collection, owner, remote_id).await {
                Ok(()) => PushAction::Deleted,
                Err(error) => {
                    report.fail(record, &error);
                    continue;
                }
            },
            None => PushAction::DiscardedLocal,
        };

        ops.push(BatchOp::HardDelete {
            collection,
            local_id: record.local_id,
            owner: owner.clone(),
        });
        report.succeed(record, record.remote_id.clone(), action);
    }

    (report, ops)
}
