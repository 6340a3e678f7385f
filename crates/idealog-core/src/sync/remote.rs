//! Remote store seam

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Collection, OwnerId, RawTimestamp, RecordFields, RemoteId, SyncState};

/// A record as returned by the remote store.
///
/// Timestamps are kept raw until the merge compares or stores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: RemoteId,
    pub created_at: RawTimestamp,
    pub updated_at: Option<RawTimestamp>,
    pub fields: RecordFields,
}

impl RemoteRecord {
    /// Normalized creation time
    pub fn created_millis(&self) -> i64 {
        self.created_at.normalize_or_epoch()
    }

    /// Timestamp used for newest-wins comparisons, in milliseconds.
    pub fn effective_updated_at(&self) -> i64 {
        self.updated_at
            .as_ref()
            .map_or_else(|| self.created_millis(), RawTimestamp::normalize_or_epoch)
    }
}

/// Full remote content of one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub ideas: Vec<RemoteRecord>,
    pub drafts: Vec<RemoteRecord>,
}

impl RemoteSnapshot {
    /// Records of one collection
    pub fn records(&self, collection: Collection) -> &[RemoteRecord] {
        match collection {
            Collection::Ideas => &self.ideas,
            Collection::Drafts => &self.drafts,
        }
    }

    /// Whether the owner has nothing remotely
    pub fn is_empty(&self) -> bool {
        self.ideas.is_empty() && self.drafts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ideas.len() + self.drafts.len()
    }
}

/// Transport to the authoritative remote store.
///
/// Implementations surface every failure as [`crate::Error::Remote`] and are
/// responsible for their own timeouts.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Create a record remotely and return its new id
    async fn create_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        fields: &RecordFields,
    ) -> Result<RemoteId>;

    /// Replace the fields of an existing remote record
    async fn update_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
        fields: &RecordFields,
    ) -> Result<()>;

    /// Delete a remote record. Deleting a missing record succeeds.
    async fn delete_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
    ) -> Result<()>;

    /// Every remote record of an owner in one collection
    async fn list_remote(&self, collection: Collection, owner: &OwnerId)
        -> Result<Vec<RemoteRecord>>;

    /// Record the sync state on the remote copy
    async fn update_remote_sync_state(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
        state: SyncState,
    ) -> Result<()>;
}

/// Fetch both collections of an owner concurrently.
///
/// Fails as a whole if either listing fails.
pub async fn fetch_snapshot<R: RemoteStore>(remote: &R, owner: &OwnerId) -> Result<RemoteSnapshot> {
    let (ideas, drafts) = tokio::try_join!(
        remote.list_remote(Collection::Ideas, owner),
        remote.list_remote(Collection::Drafts, owner),
    )?;
    Ok(RemoteSnapshot { ideas, drafts })
}
