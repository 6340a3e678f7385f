//! Record store service shared by every client and the sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::locks::{OwnerGuard, OwnerLocks};
use crate::batch::{BatchOp, BatchSink};
use crate::cache::{CacheKey, QueryCache, QueryKind};
use crate::config::EngineConfig;
use crate::db::{Database, RecordRepository, SqliteRecordRepository};
use crate::error::{Error, Result};
use crate::models::{
    Collection, LocalId, OwnerId, PendingSync, Record, RecordFields, RecordPage, RecordPatch,
    RecordQuery, SyncConflict, SyncState,
};

/// Memoized result of a derived read
#[derive(Debug, Clone)]
pub enum CachedQuery {
    Page(RecordPage),
    Count(usize),
    Record(Record),
    Pending(PendingSync),
}

/// Consistency counters of one owner's local data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Records visible to queries
    pub live: usize,
    /// Tombstones awaiting a pushed deletion
    pub tombstoned: usize,
    /// Records in state `local`
    pub pending: usize,
    /// Records in state `synced` without a remote id; always zero
    pub synced_without_remote_id: usize,
}

/// Thread-safe owner-scoped store for ideas and drafts.
///
/// Writes are serialized per owner and invalidate that owner's cached
/// queries; reads are memoized until the cache TTL elapses.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Mutex<Database>>,
    cache: Arc<QueryCache<CachedQuery>>,
    locks: OwnerLocks,
}

impl RecordStore {
    /// Wrap an open database.
    pub fn new(db: Database, config: &EngineConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            cache: Arc::new(QueryCache::new(config.cache_ttl)),
            locks: OwnerLocks::new(),
        }
    }

    /// Open a store at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh one created.
    pub fn open_path(db_path: impl Into<PathBuf>, config: &EngineConfig) -> Result<Self> {
        let db_path = db_path.into();
        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };
        Ok(Self::new(db, config))
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?, config))
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .map_or_else(|| "idealog.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale database sidecar {}", path.display());
            }
        }

        Ok(())
    }

    pub(crate) fn cache(&self) -> Arc<QueryCache<CachedQuery>> {
        Arc::clone(&self.cache)
    }

    /// Wait for exclusive write access to an owner's data.
    pub(crate) async fn lock_owner(&self, owner: &OwnerId) -> OwnerGuard {
        self.locks.acquire(owner).await
    }

    /// Run `work` in one storage transaction and drop the owner's cached reads.
    ///
    /// Callers must hold the owner's lock.
    pub(crate) async fn transact<T>(
        &self,
        owner: &OwnerId,
        work: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut db = self.db.lock().await;
        let result = db.transaction(|tx| work(&SqliteRecordRepository::new(tx)));
        if result.is_ok() {
            self.cache.invalidate_owner(owner);
        }
        result
    }

    /// Create a record in state `local`.
    pub async fn create(&self, owner: &OwnerId, fields: RecordFields) -> Result<Record> {
        let _guard = self.lock_owner(owner).await;
        let record = self
            .transact(owner, |repo| repo.create(owner, &fields))
            .await?;
        tracing::debug!(
            "Created {} {} for {}",
            record.collection().singular(),
            record.local_id,
            owner
        );
        Ok(record)
    }

    /// Fetch one live record.
    pub async fn get(&self, collection: Collection, id: LocalId, owner: &OwnerId) -> Result<Record> {
        let key = CacheKey::new(QueryKind::Record(collection), owner, id.to_string());
        if let Some(CachedQuery::Record(record)) = self.cache.get(&key) {
            return Ok(record);
        }

        let found = self
            .read_cached(
                key,
                |repo| {
                    repo.normalize_timestamps(collection, owner)?;
                    Ok(repo.find(collection, id, owner)?.filter(|record| !record.deleted))
                },
                |found| found.clone().map(CachedQuery::Record),
            )
            .await?;

        found.ok_or_else(|| Error::NotFound(format!("{} {id}", collection.singular())))
    }

    /// One page of live records matching `query`.
    pub async fn query(
        &self,
        collection: Collection,
        owner: &OwnerId,
        query: &RecordQuery,
    ) -> Result<RecordPage> {
        query.validate()?;
        let key = CacheKey::new(QueryKind::Page(collection), owner, query.cache_params());
        if let Some(CachedQuery::Page(page)) = self.cache.get(&key) {
            return Ok(page);
        }

        self.read_cached(
            key,
            |repo| {
                repo.normalize_timestamps(collection, owner)?;
                repo.query(collection, owner, query)
            },
            |page| Some(CachedQuery::Page(page.clone())),
        )
        .await
    }

    /// Number of live records.
    pub async fn count(&self, collection: Collection, owner: &OwnerId) -> Result<usize> {
        let key = CacheKey::new(QueryKind::Count(collection), owner, "");
        if let Some(CachedQuery::Count(count)) = self.cache.get(&key) {
            return Ok(count);
        }

        self.read_cached(
            key,
            |repo| repo.count(collection, owner),
            |count| Some(CachedQuery::Count(*count)),
        )
        .await
    }

    /// Apply a partial update. `None` when no record matched.
    pub async fn update(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
        patch: RecordPatch,
    ) -> Result<Option<Record>> {
        let _guard = self.lock_owner(owner).await;
        self.transact(owner, |repo| repo.update(collection, id, owner, &patch))
            .await
    }

    /// Tombstone a record so its deletion is pushed. `false` when no record matched.
    pub async fn soft_delete(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
    ) -> Result<bool> {
        let _guard = self.lock_owner(owner).await;
        let deleted = self
            .transact(owner, |repo| repo.soft_delete(collection, id, owner))
            .await?;
        Ok(deleted.is_some())
    }

    /// Physically remove a record. Reserved for sync reconciliation.
    pub async fn hard_delete(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
    ) -> Result<bool> {
        let _guard = self.lock_owner(owner).await;
        self.transact(owner, |repo| repo.hard_delete(collection, id, owner))
            .await
    }

    /// Records awaiting a push, across both collections.
    pub async fn pending_for_sync(&self, owner: &OwnerId) -> Result<PendingSync> {
        let key = CacheKey::new(QueryKind::PendingSync, owner, "");
        if let Some(CachedQuery::Pending(pending)) = self.cache.get(&key) {
            return Ok(pending);
        }

        self.read_cached(
            key,
            |repo| repo.pending_for_sync(owner),
            |pending| Some(CachedQuery::Pending(pending.clone())),
        )
        .await
    }

    /// Most recent conflicts flagged by `merge`.
    pub async fn list_conflicts(&self, owner: &OwnerId, limit: usize) -> Result<Vec<SyncConflict>> {
        self.read(|repo| repo.list_conflicts(owner, limit)).await
    }

    /// Count live, tombstoned and pending records and check sync-state consistency.
    pub async fn integrity_report(&self, owner: &OwnerId) -> Result<IntegrityReport> {
        self.read(|repo| {
            let mut report = IntegrityReport::default();
            for collection in Collection::ALL {
                for record in repo.list_all(collection, owner)? {
                    if record.deleted {
                        report.tombstoned += 1;
                    } else {
                        report.live += 1;
                    }
                    match (record.sync_state, &record.remote_id) {
                        (SyncState::Local, _) => report.pending += 1,
                        (SyncState::Synced, None) => report.synced_without_remote_id += 1,
                        (SyncState::Synced, Some(_)) => {}
                    }
                }
            }
            Ok(report)
        })
        .await
    }

    /// Run a read inside a transaction so it never observes a half-applied batch.
    async fn read<T>(&self, work: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>) -> Result<T> {
        let mut db = self.db.lock().await;
        db.transaction(|tx| work(&SqliteRecordRepository::new(tx)))
    }

    /// Like [`Self::read`], memoizing the result under `key`.
    async fn read_cached<T>(
        &self,
        key: CacheKey,
        work: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>,
        entry: impl FnOnce(&T) -> Option<CachedQuery>,
    ) -> Result<T> {
        let mut db = self.db.lock().await;
        let value = db.transaction(|tx| work(&SqliteRecordRepository::new(tx)))?;
        // Inserted before the database is released; writes invalidate while holding it
        if let Some(entry) = entry(&value) {
            self.cache.insert(key, entry);
        }
        Ok(value)
    }

    /// Apply one owner's sync reconciliation writes in a transaction of their own.
    ///
    /// Callers must hold the owner's lock.
    pub(crate) async fn apply_reconciliation(
        &self,
        owner: &OwnerId,
        ops: &[BatchOp],
    ) -> Result<Vec<bool>> {
        if let Some(foreign) = ops.iter().find(|op| op.owner() != owner) {
            return Err(Error::Validation(format!(
                "reconciliation for {owner} cannot touch data of {}",
                foreign.owner()
            )));
        }
        self.transact(owner, |repo| {
            ops.iter().map(|op| apply_op(repo, op)).collect()
        })
        .await
    }
}

fn apply_op(repo: &SqliteRecordRepository<'_>, op: &BatchOp) -> Result<bool> {
    match op {
        BatchOp::Update {
            collection,
            local_id,
            owner,
            patch,
        } => Ok(repo.update(*collection, *local_id, owner, patch)?.is_some()),
        BatchOp::SoftDelete {
            collection,
            local_id,
            owner,
        } => Ok(repo.soft_delete(*collection, *local_id, owner)?.is_some()),
        BatchOp::HardDelete {
            collection,
            local_id,
            owner,
        } => repo.hard_delete(*collection, *local_id, owner),
    }
}

impl BatchSink for RecordStore {
    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<bool>> {
        let mut db = self.db.lock().await;
        let matched = db.transaction(|tx| {
            let repo = SqliteRecordRepository::new(tx);
            ops.iter()
                .map(|op| apply_op(&repo, op))
                .collect::<Result<Vec<_>>>()
        })?;

        for op in &ops {
            self.cache.invalidate_owner(op.owner());
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{DraftFields, IdeaFields, RemoteId};
    use pretty_assertions::assert_eq;

    fn store() -> RecordStore {
        RecordStore::open_in_memory(&EngineConfig::default()).unwrap()
    }

    fn owner() -> OwnerId {
        OwnerId::new("user-1").unwrap()
    }

    fn idea(title: &str) -> RecordFields {
        RecordFields::Idea(IdeaFields::titled(title))
    }

    #[tokio::test]
    async fn create_then_get_roundtrip() {
        let store = store();
        let created = store.create(&owner(), idea("Ownership")).await.unwrap();

        let fetched = store
            .get(Collection::Ideas, created.local_id, &owner())
            .await
            .unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_tombstoned_record_is_not_found() {
        let store = store();
        let created = store.create(&owner(), idea("gone")).await.unwrap();
        assert!(store
            .soft_delete(Collection::Ideas, created.local_id, &owner())
            .await
            .unwrap());

        let error = store
            .get(Collection::Ideas, created.local_id, &owner())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn writes_invalidate_cached_queries() {
        let store = store();
        store.create(&owner(), idea("first")).await.unwrap();

        let query = RecordQuery::default();
        let before = store.query(Collection::Ideas, &owner(), &query).await.unwrap();
        assert_eq!(before.total, 1);
        assert_eq!(store.count(Collection::Ideas, &owner()).await.unwrap(), 1);

        store.create(&owner(), idea("second")).await.unwrap();
        let after = store.query(Collection::Ideas, &owner(), &query).await.unwrap();
        assert_eq!(after.total, 2);
        assert_eq!(store.count(Collection::Ideas, &owner()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn get_is_served_from_cache_until_write() {
        let store = store();
        let created = store.create(&owner(), idea("cached")).await.unwrap();
        store
            .get(Collection::Ideas, created.local_id, &owner())
            .await
            .unwrap();

        let key = CacheKey::new(
            QueryKind::Record(Collection::Ideas),
            &owner(),
            created.local_id.to_string(),
        );
        assert!(store.cache.get(&key).is_some());

        store
            .update(
                Collection::Ideas,
                created.local_id,
                &owner(),
                RecordPatch::fields(idea("renamed")),
            )
            .await
            .unwrap();
        assert!(store.cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_record_are_noops() {
        let store = store();
        let updated = store
            .update(
                Collection::Drafts,
                LocalId(42),
                &owner(),
                RecordPatch::fields(RecordFields::Draft(DraftFields::new("x"))),
            )
            .await
            .unwrap();
        assert!(updated.is_none());
        assert!(!store
            .soft_delete(Collection::Drafts, LocalId(42), &owner())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn invalid_query_is_rejected_before_cache() {
        let store = store();
        let error = store
            .query(
                Collection::Ideas,
                &owner(),
                &RecordQuery::default().with_page(0, 10),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Validation(_)));
    }

    #[tokio::test]
    async fn apply_batch_is_atomic() {
        let store = store();
        let created = store.create(&owner(), idea("keep")).await.unwrap();

        // The second op fails validation, so the first must not stick either
        let result = store
            .apply_batch(vec![
                BatchOp::SoftDelete {
                    collection: Collection::Ideas,
                    local_id: created.local_id,
                    owner: owner(),
                },
                BatchOp::Update {
                    collection: Collection::Ideas,
                    local_id: created.local_id,
                    owner: owner(),
                    patch: RecordPatch::fields(idea("")),
                },
            ])
            .await;
        assert!(result.is_err());

        let still_live = store
            .get(Collection::Ideas, created.local_id, &owner())
            .await
            .unwrap();
        assert!(!still_live.deleted);
    }

    #[tokio::test]
    async fn reconciliation_is_scoped_to_one_owner() {
        let store = store();
        let other = OwnerId::new("user-2").unwrap();
        let theirs = store.create(&other, idea("theirs")).await.unwrap();

        let _guard = store.lock_owner(&owner()).await;
        let error = store
            .apply_reconciliation(
                &owner(),
                &[BatchOp::HardDelete {
                    collection: Collection::Ideas,
                    local_id: theirs.local_id,
                    owner: other.clone(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Validation(_)));
        assert_eq!(store.count(Collection::Ideas, &other).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_never_cache_a_superseded_result() {
        let store = store();
        for round in 0..25 {
            let record = store.create(&owner(), idea("pending")).await.unwrap();

            let readers = (0..8)
                .map(|_| {
                    let store = store.clone();
                    tokio::spawn(async move { store.pending_for_sync(&owner()).await })
                })
                .collect::<Vec<_>>();
            store
                .update(
                    Collection::Ideas,
                    record.local_id,
                    &owner(),
                    RecordPatch::mark_synced(RemoteId::new(format!("r{round}")).unwrap()),
                )
                .await
                .unwrap();
            for reader in readers {
                reader.await.unwrap().unwrap();
            }

            assert!(store.pending_for_sync(&owner()).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn integrity_report_counts_states() {
        let store = store();
        let kept = store.create(&owner(), idea("a")).await.unwrap();
        let removed = store.create(&owner(), idea("b")).await.unwrap();
        store
            .update(
                Collection::Ideas,
                kept.local_id,
                &owner(),
                RecordPatch::mark_synced(RemoteId::new("r1").unwrap()),
            )
            .await
            .unwrap();
        store
            .soft_delete(Collection::Ideas, removed.local_id, &owner())
            .await
            .unwrap();

        let report = store.integrity_report(&owner()).await.unwrap();
        assert_eq!(
            report,
            IntegrityReport {
                live: 1,
                tombstoned: 1,
                pending: 1,
                synced_without_remote_id: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cached_count_expires_after_ttl() {
        let config = EngineConfig::default().with_cache_ttl(Duration::from_secs(1));
        let store = RecordStore::open_in_memory(&config).unwrap();
        store.count(Collection::Drafts, &owner()).await.unwrap();
        assert_eq!(store.cache.len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.cache.sweep_expired(), 1);
    }

    #[test]
    fn open_path_recovers_from_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("idealog.db");
        let wal_path = dir.path().join("idealog.db-wal");
        std::fs::write(&db_path, vec![b'x'; 8192]).unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();

        RecordStore::open_path(&db_path, &EngineConfig::default()).unwrap();

        assert!(db_path.exists());
        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("idealog.db.corrupt-")
            })
            .count();
        assert_eq!(backups, 1);
    }
}
