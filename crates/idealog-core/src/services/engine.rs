//! Sync engine: the composition root tying the record store to a remote store.

use std::collections::BTreeSet;

use super::store::RecordStore;
use crate::batch::{BatchCoalescer, BatchOp};
use crate::cache::CacheSweeper;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::OwnerId;
use crate::sync::{
    fetch_snapshot, push_pending, reconcile, replace_all, ConflictPolicy, MergeMode,
    MergeOutcome, PushReport, RemoteStore,
};

/// Owns the background tasks of one engine instance and exposes the
/// user-triggered sync entry points.
///
/// Every entry point takes the owner's lock for its whole duration, so a
/// push, a pull and direct edits of the same owner never interleave.
pub struct SyncEngine<R> {
    store: RecordStore,
    remote: R,
    coalescer: BatchCoalescer,
    sweeper: CacheSweeper,
    config: EngineConfig,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Start the engine's background tasks. Must be called inside a tokio runtime.
    pub fn start(store: RecordStore, remote: R, config: EngineConfig) -> Self {
        let coalescer = BatchCoalescer::spawn(store.clone(), config.batch_window);
        let sweeper = CacheSweeper::spawn(store.cache(), config.cache_sweep_interval);
        tracing::debug!(
            "Sync engine started (batch window {:?}, cache ttl {:?})",
            config.batch_window,
            config.cache_ttl
        );
        Self {
            store,
            remote,
            coalescer,
            sweeper,
            config,
        }
    }

    pub const fn store(&self) -> &RecordStore {
        &self.store
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply a burst of writes through the batch coalescer.
    ///
    /// Each operation's result reports whether a record matched it.
    pub async fn submit_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<bool>> {
        ops.iter().try_for_each(BatchOp::validate)?;
        let owners: BTreeSet<OwnerId> = ops.iter().map(|op| op.owner().clone()).collect();
        // Sorted acquisition keeps two multi-owner batches from deadlocking
        let mut guards = Vec::with_capacity(owners.len());
        for owner in &owners {
            guards.push(self.store.lock_owner(owner).await);
        }
        self.coalescer.submit_all(ops).await
    }

    /// Upload every pending local change of `owner`.
    ///
    /// Remote failures are reported per record; only a local storage failure
    /// fails the whole call.
    pub async fn push(&self, owner: &OwnerId) -> Result<PushReport> {
        let _guard = self.store.lock_owner(owner).await;
        let pending = self.store.pending_for_sync(owner).await?;
        if pending.is_empty() {
            tracing::debug!("Nothing to push for {owner}");
            return Ok(PushReport::default());
        }

        let (report, ops) = push_pending(&self.remote, owner, pending).await;
        // Kept out of the shared batch: the remote side is already committed
        if !ops.is_empty() {
            self.store.apply_reconciliation(owner, &ops).await?;
        }

        tracing::info!(
            "Pushed for {owner}: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Pull the remote snapshot and apply it additively.
    ///
    /// Refused with `PreconditionFailed` while any local change is unpushed.
    pub async fn sync_from_remote(&self, owner: &OwnerId) -> Result<MergeOutcome> {
        let _guard = self.store.lock_owner(owner).await;
        let pending = self.store.pending_for_sync(owner).await?;
        if !pending.is_empty() {
            return Err(Error::PreconditionFailed {
                pending: pending.len(),
            });
        }

        let snapshot = fetch_snapshot(&self.remote, owner).await?;
        self.store
            .transact(owner, |repo| {
                reconcile(repo, owner, &snapshot, MergeMode::Additive)
            })
            .await
    }

    /// Pull the remote snapshot and merge it, flagging near-simultaneous edits
    /// of pending records as conflicts resolved by `policy`.
    pub async fn merge(&self, owner: &OwnerId, policy: ConflictPolicy) -> Result<MergeOutcome> {
        let _guard = self.store.lock_owner(owner).await;
        let snapshot = fetch_snapshot(&self.remote, owner).await?;
        let mode = MergeMode::ConflictAware {
            policy,
            tolerance_ms: self.config.conflict_tolerance_millis(),
        };
        self.store
            .transact(owner, |repo| reconcile(repo, owner, &snapshot, mode))
            .await
    }

    /// Discard all local data of `owner` and copy the remote snapshot in.
    ///
    /// Irreversible; callers must confirm with the user first.
    pub async fn force_replace(&self, owner: &OwnerId) -> Result<MergeOutcome> {
        let _guard = self.store.lock_owner(owner).await;
        let snapshot = fetch_snapshot(&self.remote, owner).await?;
        tracing::warn!("Replacing local data of {owner} with the remote copy");
        self.store
            .transact(owner, |repo| replace_all(repo, owner, &snapshot))
            .await
    }

    /// Stop the cache sweep and flush queued writes.
    pub async fn shutdown(self) {
        self.sweeper.shutdown().await;
        self.coalescer.shutdown().await;
        tracing::debug!("Sync engine stopped");
    }
}
