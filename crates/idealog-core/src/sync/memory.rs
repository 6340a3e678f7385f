//! In-memory remote store
//!
//! Keeps remote records in process. Used by tests and by offline demos; it
//! can be switched offline or told to reject specific creations to exercise
//! failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::remote::{RemoteRecord, RemoteStore};
use crate::error::{Error, Result};
use crate::models::{Collection, OwnerId, RawTimestamp, RecordFields, RemoteId, SyncState};
use crate::util::now_millis;

type CreateFilter = Arc<dyn Fn(&RecordFields) -> bool + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<(OwnerId, Collection), Vec<RemoteRecord>>,
    sync_states: HashMap<RemoteId, SyncState>,
    offline: bool,
    reject_create: Option<CreateFilter>,
    create_calls: usize,
    delete_calls: usize,
}

/// Remote store backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call fail with a retryable error
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Reject creations whose fields match `filter`
    pub fn reject_creates_when(&self, filter: impl Fn(&RecordFields) -> bool + Send + Sync + 'static) {
        self.lock().reject_create = Some(Arc::new(filter));
    }

    /// Stop rejecting creations
    pub fn accept_all_creates(&self) {
        self.lock().reject_create = None;
    }

    /// Place a record directly in the remote store
    pub fn seed(&self, collection: Collection, owner: &OwnerId, record: RemoteRecord) {
        self.lock()
            .records
            .entry((owner.clone(), collection))
            .or_default()
            .push(record);
    }

    /// Snapshot of an owner's remote records
    pub fn records(&self, collection: Collection, owner: &OwnerId) -> Vec<RemoteRecord> {
        self.lock()
            .records
            .get(&(owner.clone(), collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Remove every remote record of an owner
    pub fn clear_owner(&self, owner: &OwnerId) {
        self.lock().records.retain(|(key, _), _| key != owner);
    }

    /// Last sync state acknowledged for a remote record
    pub fn sync_state(&self, remote_id: &RemoteId) -> Option<SyncState> {
        self.lock().sync_states.get(remote_id).copied()
    }

    /// Number of create calls received, including rejected ones
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Number of delete calls received
    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }
}

fn ensure_online(state: &MemoryState) -> Result<()> {
    if state.offline {
        return Err(Error::remote("remote store unreachable", true));
    }
    Ok(())
}

fn not_found(collection: Collection, remote_id: &RemoteId) -> Error {
    Error::remote(
        format!("no remote {} with id {remote_id}", collection.singular()),
        false,
    )
}

impl RemoteStore for MemoryRemoteStore {
    async fn create_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        fields: &RecordFields,
    ) -> Result<RemoteId> {
        let mut state = self.lock();
        state.create_calls += 1;
        ensure_online(&state)?;
        if state
            .reject_create
            .as_ref()
            .is_some_and(|reject| reject(fields))
        {
            return Err(Error::remote("remote store rejected the record", false));
        }

        let remote_id = RemoteId::new(Uuid::now_v7().to_string())?;
        let now = now_millis();
        state
            .records
            .entry((owner.clone(), collection))
            .or_default()
            .push(RemoteRecord {
                remote_id: remote_id.clone(),
                created_at: RawTimestamp::Millis(now),
                updated_at: Some(RawTimestamp::Millis(now)),
                fields: fields.clone(),
            });
        state.sync_states.insert(remote_id.clone(), SyncState::Local);
        Ok(remote_id)
    }

    async fn update_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
        fields: &RecordFields,
    ) -> Result<()> {
        let mut state = self.lock();
        ensure_online(&state)?;
        let record = state
            .records
            .get_mut(&(owner.clone(), collection))
            .and_then(|records| records.iter_mut().find(|r| &r.remote_id == remote_id))
            .ok_or_else(|| not_found(collection, remote_id))?;
        record.fields = fields.clone();
        record.updated_at = Some(RawTimestamp::Millis(now_millis()));
        state.sync_states.insert(remote_id.clone(), SyncState::Local);
        Ok(())
    }

    async fn delete_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
    ) -> Result<()> {
        let mut state = self.lock();
        state.delete_calls += 1;
        ensure_online(&state)?;
        if let Some(records) = state.records.get_mut(&(owner.clone(), collection)) {
            records.retain(|record| &record.remote_id != remote_id);
        }
        state.sync_states.remove(remote_id);
        Ok(())
    }

    async fn list_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
    ) -> Result<Vec<RemoteRecord>> {
        let state = self.lock();
        ensure_online(&state)?;
        Ok(state
            .records
            .get(&(owner.clone(), collection))
            .cloned()
            .unwrap_or_default())
    }

    async fn update_remote_sync_state(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
        sync_state: SyncState,
    ) -> Result<()> {
        let mut state = self.lock();
        ensure_online(&state)?;
        let exists = state
            .records
            .get(&(owner.clone(), collection))
            .is_some_and(|records| records.iter().any(|r| &r.remote_id == remote_id));
        if !exists {
            return Err(not_found(collection, remote_id));
        }
        state.sync_states.insert(remote_id.clone(), sync_state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DraftFields, IdeaFields};
    use pretty_assertions::assert_eq;

    fn owner() -> OwnerId {
        OwnerId::new("user-1").unwrap()
    }

    #[tokio::test]
    async fn create_assigns_unique_ids_in_insertion_order() {
        let remote = MemoryRemoteStore::new();
        let fields = RecordFields::Idea(IdeaFields::titled("a"));

        let first = remote
            .create_remote(Collection::Ideas, &owner(), &fields)
            .await
            .unwrap();
        let second = remote
            .create_remote(Collection::Ideas, &owner(), &fields)
            .await
            .unwrap();
        assert_ne!(first, second);

        let listed = remote.list_remote(Collection::Ideas, &owner()).await.unwrap();
        let ids: Vec<_> = listed.into_iter().map(|r| r.remote_id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn listing_is_scoped_by_owner_and_collection() {
        let remote = MemoryRemoteStore::new();
        let draft = RecordFields::Draft(DraftFields::new("d"));
        remote
            .create_remote(Collection::Drafts, &owner(), &draft)
            .await
            .unwrap();

        let other = OwnerId::new("user-2").unwrap();
        assert!(remote.list_remote(Collection::Drafts, &other).await.unwrap().is_empty());
        assert!(remote.list_remote(Collection::Ideas, &owner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_store_fails_with_retryable_error() {
        let remote = MemoryRemoteStore::new();
        remote.set_offline(true);

        let error = remote
            .list_remote(Collection::Ideas, &owner())
            .await
            .unwrap_err();
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn rejected_creates_are_counted_but_not_stored() {
        let remote = MemoryRemoteStore::new();
        remote.reject_creates_when(|fields| fields.headline() == "bad");

        let bad = RecordFields::Idea(IdeaFields::titled("bad"));
        assert!(remote
            .create_remote(Collection::Ideas, &owner(), &bad)
            .await
            .is_err());
        assert_eq!(remote.create_calls(), 1);
        assert!(remote.records(Collection::Ideas, &owner()).is_empty());
    }

    #[tokio::test]
    async fn sync_state_acknowledgement_requires_existing_record() {
        let remote = MemoryRemoteStore::new();
        let missing = RemoteId::new("missing").unwrap();
        assert!(remote
            .update_remote_sync_state(Collection::Ideas, &owner(), &missing, SyncState::Synced)
            .await
            .is_err());

        let fields = RecordFields::Idea(IdeaFields::titled("a"));
        let id = remote
            .create_remote(Collection::Ideas, &owner(), &fields)
            .await
            .unwrap();
        remote
            .update_remote_sync_state(Collection::Ideas, &owner(), &id, SyncState::Synced)
            .await
            .unwrap();
        assert_eq!(remote.sync_state(&id), Some(SyncState::Synced));
    }

    #[tokio::test]
    async fn deleting_missing_record_succeeds() {
        let remote = MemoryRemoteStore::new();
        let missing = RemoteId::new("gone").unwrap();
        remote
            .delete_remote(Collection::Drafts, &owner(), &missing)
            .await
            .unwrap();
        assert_eq!(remote.delete_calls(), 1);
    }
}
