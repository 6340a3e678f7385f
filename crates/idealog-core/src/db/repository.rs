//! Record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{
    Collection, DraftFields, IdeaFields, LocalId, OwnerId, PendingSync, RawTimestamp, Record,
    RecordFields, RecordPage, RecordPatch, RecordQuery, RemoteId, SortField, SyncConflict,
    SyncState,
};
use crate::sync::RemoteRecord;
use crate::util::now_millis;

const SHARED_COLUMNS: &str =
    "local_id, owner_id, remote_id, created_at, updated_at, deleted, deleted_at, sync_state";

const IDEA_COLUMNS: &str =
    "title, content_idea, context, problem, discovery, teaching_angle, code, hook";

const DRAFT_COLUMNS: &str = "content, idea_id";

/// Trait for idea and draft storage operations.
///
/// Every method is scoped to one owner; records of other owners are never
/// visible through it.
pub trait RecordRepository {
    /// Insert a new locally created record
    fn create(&self, owner: &OwnerId, fields: &RecordFields) -> Result<Record>;

    /// Get a record by id, including tombstones
    fn find(&self, collection: Collection, id: LocalId, owner: &OwnerId)
        -> Result<Option<Record>>;

    /// List live records matching a query, one page at a time
    fn query(&self, collection: Collection, owner: &OwnerId, query: &RecordQuery)
        -> Result<RecordPage>;

    /// Count live records
    fn count(&self, collection: Collection, owner: &OwnerId) -> Result<usize>;

    /// Apply a partial update; `None` when no record matched
    fn update(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
        patch: &RecordPatch,
    ) -> Result<Option<Record>>;

    /// Tombstone a record; `None` when no record matched
    fn soft_delete(&self, collection: Collection, id: LocalId, owner: &OwnerId)
        -> Result<Option<Record>>;

    /// Physically remove a record
    fn hard_delete(&self, collection: Collection, id: LocalId, owner: &OwnerId) -> Result<bool>;

    /// Every record in state `local`, across both collections
    fn pending_for_sync(&self, owner: &OwnerId) -> Result<PendingSync>;

    /// Every record of a collection, tombstones included, in insertion order
    fn list_all(&self, collection: Collection, owner: &OwnerId) -> Result<Vec<Record>>;

    /// Insert a record copied from the remote store, marked `synced`
    fn insert_synced(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote: &RemoteRecord,
    ) -> Result<Record>;

    /// Replace a local record's content with the remote copy, keeping its local id
    fn overwrite_from_remote(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
        remote: &RemoteRecord,
    ) -> Result<Record>;

    /// Remove every record of an owner from both collections
    fn delete_all(&self, owner: &OwnerId) -> Result<usize>;

    /// Rewrite legacy timestamp columns into Unix milliseconds
    fn normalize_timestamps(&self, collection: Collection, owner: &OwnerId) -> Result<usize>;

    /// Append an entry to the conflict log
    fn record_conflict(&self, conflict: &SyncConflict) -> Result<i64>;

    /// Most recent conflict log entries of an owner
    fn list_conflicts(&self, owner: &OwnerId, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn select_sql(collection: Collection) -> String {
        let specific = match collection {
            Collection::Ideas => IDEA_COLUMNS,
            Collection::Drafts => DRAFT_COLUMNS,
        };
        format!("SELECT {SHARED_COLUMNS}, {specific} FROM {}", collection.as_str())
    }

    /// Parse a record from a database row
    fn parse_record(collection: Collection, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let owner: String = row.get(1)?;
        let remote: Option<String> = row.get(2)?;
        let state: String = row.get(7)?;

        let fields = match collection {
            Collection::Ideas => RecordFields::Idea(IdeaFields {
                title: row.get(8)?,
                content_idea: row.get(9)?,
                context: row.get(10)?,
                problem: row.get(11)?,
                discovery: row.get(12)?,
                teaching_angle: row.get(13)?,
                code: row.get(14)?,
                hook: row.get(15)?,
            }),
            Collection::Drafts => RecordFields::Draft(DraftFields {
                content: row.get(8)?,
                idea_id: row.get::<_, Option<i64>>(9)?.map(LocalId),
            }),
        };

        Ok(Record {
            local_id: LocalId(row.get(0)?),
            owner_id: OwnerId::new(owner).map_err(|e| conversion_error(1, e))?,
            remote_id: remote
                .map(RemoteId::new)
                .transpose()
                .map_err(|e| conversion_error(2, e))?,
            created_at: timestamp_column(row, 3)?.unwrap_or(0),
            updated_at: timestamp_column(row, 4)?,
            deleted: row.get::<_, i32>(5)? != 0,
            deleted_at: timestamp_column(row, 6)?,
            sync_state: state.parse().map_err(|e| conversion_error(7, e))?,
            fields,
        })
    }

    fn insert_row(
        &self,
        owner: &OwnerId,
        remote_id: Option<&RemoteId>,
        created_at: i64,
        updated_at: Option<i64>,
        sync_state: SyncState,
        fields: &RecordFields,
    ) -> Result<LocalId> {
        let remote_id = remote_id.map(RemoteId::as_str);
        match fields {
            RecordFields::Idea(idea) => self.conn.execute(
                "INSERT INTO ideas (owner_id, remote_id, created_at, updated_at, sync_state,
                    title, content_idea, context, problem, discovery, teaching_angle, code, hook)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    owner.as_str(),
                    remote_id,
                    created_at,
                    updated_at,
                    sync_state.as_str(),
                    idea.title,
                    idea.content_idea,
                    idea.context,
                    idea.problem,
                    idea.discovery,
                    idea.teaching_angle,
                    idea.code,
                    idea.hook,
                ],
            )?,
            RecordFields::Draft(draft) => self.conn.execute(
                "INSERT INTO drafts (owner_id, remote_id, created_at, updated_at, sync_state,
                    content, idea_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    owner.as_str(),
                    remote_id,
                    created_at,
                    updated_at,
                    sync_state.as_str(),
                    draft.content,
                    draft.idea_id.map(LocalId::get),
                ],
            )?,
        };
        Ok(LocalId(self.conn.last_insert_rowid()))
    }

    /// Write every column of an existing record back to its row
    fn write_row(&self, record: &Record) -> Result<()> {
        let remote_id = record.remote_id.as_ref().map(RemoteId::as_str);
        let rows = match &record.fields {
            RecordFields::Idea(idea) => self.conn.execute(
                "UPDATE ideas SET remote_id = ?3, created_at = ?4, updated_at = ?5, deleted = ?6,
                    deleted_at = ?7, sync_state = ?8, title = ?9, content_idea = ?10,
                    context = ?11, problem = ?12, discovery = ?13, teaching_angle = ?14,
                    code = ?15, hook = ?16
                 WHERE local_id = ?1 AND owner_id = ?2",
                params![
                    record.local_id.get(),
                    record.owner_id.as_str(),
                    remote_id,
                    record.created_at,
                    record.updated_at,
                    i32::from(record.deleted),
                    record.deleted_at,
                    record.sync_state.as_str(),
                    idea.title,
                    idea.content_idea,
                    idea.context,
                    idea.problem,
                    idea.discovery,
                    idea.teaching_angle,
                    idea.code,
                    idea.hook,
                ],
            )?,
            RecordFields::Draft(draft) => self.conn.execute(
                "UPDATE drafts SET remote_id = ?3, created_at = ?4, updated_at = ?5, deleted = ?6,
                    deleted_at = ?7, sync_state = ?8, content = ?9, idea_id = ?10
                 WHERE local_id = ?1 AND owner_id = ?2",
                params![
                    record.local_id.get(),
                    record.owner_id.as_str(),
                    remote_id,
                    record.created_at,
                    record.updated_at,
                    i32::from(record.deleted),
                    record.deleted_at,
                    record.sync_state.as_str(),
                    draft.content,
                    draft.idea_id.map(LocalId::get),
                ],
            )?,
        };

        if rows == 0 {
            return Err(Error::NotFound(format!(
                "{} {}",
                record.collection().singular(),
                record.local_id
            )));
        }
        Ok(())
    }

    fn pending_in(&self, collection: Collection, owner: &OwnerId) -> Result<Vec<Record>> {
        let sql = format!(
            "{} WHERE owner_id = ?1 AND sync_state = 'local' ORDER BY local_id ASC",
            Self::select_sql(collection)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![owner.as_str()], |row| {
                Self::parse_record(collection, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn create(&self, owner: &OwnerId, fields: &RecordFields) -> Result<Record> {
        fields.validate()?;
        let created_at = now_millis();
        let local_id = self.insert_row(owner, None, created_at, None, SyncState::Local, fields)?;

        Ok(Record {
            local_id,
            owner_id: owner.clone(),
            remote_id: None,
            created_at,
            updated_at: None,
            deleted: false,
            deleted_at: None,
            sync_state: SyncState::Local,
            fields: fields.clone(),
        })
    }

    fn find(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
    ) -> Result<Option<Record>> {
        let sql = format!(
            "{} WHERE local_id = ?1 AND owner_id = ?2",
            Self::select_sql(collection)
        );
        let record = self
            .conn
            .query_row(&sql, params![id.get(), owner.as_str()], |row| {
                Self::parse_record(collection, row)
            })
            .optional()?;
        Ok(record)
    }

    fn query(
        &self,
        collection: Collection,
        owner: &OwnerId,
        query: &RecordQuery,
    ) -> Result<RecordPage> {
        query.validate()?;

        let mut clauses = vec!["owner_id = ?".to_string(), "deleted = 0".to_string()];
        let mut args = vec![Value::Text(owner.as_str().to_string())];

        if let Some(from) = query.created_from {
            clauses.push("created_at >= ?".to_string());
            args.push(Value::Integer(from));
        }
        if let Some(to) = query.created_to {
            clauses.push("created_at <= ?".to_string());
            args.push(Value::Integer(to));
        }
        if let (Collection::Drafts, Some(idea_id)) = (collection, query.idea_id) {
            clauses.push("idea_id = ?".to_string());
            args.push(Value::Integer(idea_id.get()));
        }
        if let Some(term) = &query.search {
            let columns = searchable_columns(collection);
            let any = columns
                .iter()
                .map(|column| format!("instr(unicode_lower({column}), ?) > 0"))
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({any})"));
            let needle = term.to_lowercase();
            args.extend(columns.iter().map(|_| Value::Text(needle.clone())));
        }

        let where_sql = clauses.join(" AND ");
        let table = collection.as_str();

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "{} WHERE {where_sql} ORDER BY {} {}, local_id ASC LIMIT ? OFFSET ?",
            Self::select_sql(collection),
            sort_column(collection, query.sort.field),
            query.sort.direction.as_sql(),
        );
        args.push(Value::Integer(query.limit as i64));
        args.push(Value::Integer(query.offset() as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Self::parse_record(collection, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(RecordPage {
            items,
            total: usize::try_from(total).unwrap_or_default(),
        })
    }

    fn count(&self, collection: Collection, owner: &OwnerId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE owner_id = ?1 AND deleted = 0",
                collection.as_str()
            ),
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn update(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
        patch: &RecordPatch,
    ) -> Result<Option<Record>> {
        let Some(existing) = self.find(collection, id, owner)? else {
            return Ok(None);
        };

        let updated = apply_patch(existing, patch, now_millis())?;
        self.write_row(&updated)?;
        Ok(Some(updated))
    }

    fn soft_delete(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
    ) -> Result<Option<Record>> {
        let Some(mut record) = self.find(collection, id, owner)? else {
            return Ok(None);
        };
        if record.deleted {
            return Ok(Some(record));
        }

        let now = now_millis();
        record.deleted = true;
        record.deleted_at = Some(now);
        record.updated_at = Some(now);
        record.sync_state = SyncState::Local;
        self.write_row(&record)?;
        Ok(Some(record))
    }

    fn hard_delete(&self, collection: Collection, id: LocalId, owner: &OwnerId) -> Result<bool> {
        let rows = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE local_id = ?1 AND owner_id = ?2",
                collection.as_str()
            ),
            params![id.get(), owner.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn pending_for_sync(&self, owner: &OwnerId) -> Result<PendingSync> {
        let mut records = Vec::new();
        for collection in Collection::ALL {
            records.extend(self.pending_in(collection, owner)?);
        }
        Ok(PendingSync::partition(records))
    }

    fn list_all(&self, collection: Collection, owner: &OwnerId) -> Result<Vec<Record>> {
        let sql = format!(
            "{} WHERE owner_id = ?1 ORDER BY local_id ASC",
            Self::select_sql(collection)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![owner.as_str()], |row| {
                Self::parse_record(collection, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn insert_synced(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote: &RemoteRecord,
    ) -> Result<Record> {
        ensure_collection(collection, &remote.fields)?;
        let created_at = remote.created_at.normalize_or_epoch();
        let updated_at = remote.updated_at.as_ref().map(RawTimestamp::normalize_or_epoch);
        let local_id = self.insert_row(
            owner,
            Some(&remote.remote_id),
            created_at,
            updated_at,
            SyncState::Synced,
            &remote.fields,
        )?;

        Ok(Record {
            local_id,
            owner_id: owner.clone(),
            remote_id: Some(remote.remote_id.clone()),
            created_at,
            updated_at,
            deleted: false,
            deleted_at: None,
            sync_state: SyncState::Synced,
            fields: remote.fields.clone(),
        })
    }

    fn overwrite_from_remote(
        &self,
        collection: Collection,
        id: LocalId,
        owner: &OwnerId,
        remote: &RemoteRecord,
    ) -> Result<Record> {
        ensure_collection(collection, &remote.fields)?;
        let record = Record {
            local_id: id,
            owner_id: owner.clone(),
            remote_id: Some(remote.remote_id.clone()),
            created_at: remote.created_at.normalize_or_epoch(),
            updated_at: remote.updated_at.as_ref().map(RawTimestamp::normalize_or_epoch),
            deleted: false,
            deleted_at: None,
            sync_state: SyncState::Synced,
            fields: remote.fields.clone(),
        };
        self.write_row(&record)?;
        Ok(record)
    }

    fn delete_all(&self, owner: &OwnerId) -> Result<usize> {
        let mut removed = 0;
        for collection in Collection::ALL {
            removed += self.conn.execute(
                &format!("DELETE FROM {} WHERE owner_id = ?1", collection.as_str()),
                params![owner.as_str()],
            )?;
        }
        Ok(removed)
    }

    fn normalize_timestamps(&self, collection: Collection, owner: &OwnerId) -> Result<usize> {
        let table = collection.as_str();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT local_id, created_at, updated_at, deleted_at FROM {table}
             WHERE owner_id = ?1 AND (
                typeof(created_at) != 'integer'
                OR (updated_at IS NOT NULL AND typeof(updated_at) != 'integer')
                OR (deleted_at IS NOT NULL AND typeof(deleted_at) != 'integer'))"
        ))?;
        let legacy = stmt
            .query_map(params![owner.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    timestamp_column(row, 1)?.unwrap_or(0),
                    timestamp_column(row, 2)?,
                    timestamp_column(row, 3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (local_id, created_at, updated_at, deleted_at) in &legacy {
            self.conn.execute(
                &format!(
                    "UPDATE {table} SET created_at = ?2, updated_at = ?3, deleted_at = ?4
                     WHERE local_id = ?1"
                ),
                params![local_id, created_at, updated_at, deleted_at],
            )?;
        }

        if !legacy.is_empty() {
            tracing::info!(
                "Normalized timestamps of {} {} for {}",
                legacy.len(),
                table,
                owner
            );
        }
        Ok(legacy.len())
    }

    fn record_conflict(&self, conflict: &SyncConflict) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (collection, local_id, remote_id, owner_id,
                local_updated_at, remote_updated_at, resolved_at, policy)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conflict.collection.as_str(),
                conflict.local_id.get(),
                conflict.remote_id.as_str(),
                conflict.owner_id.as_str(),
                conflict.local_updated_at,
                conflict.remote_updated_at,
                conflict.resolved_at,
                conflict.policy,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_conflicts(&self, owner: &OwnerId, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, collection, local_id, remote_id, local_updated_at,
                    remote_updated_at, resolved_at, policy
             FROM sync_conflicts
             WHERE owner_id = ?1
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?2",
        )?;

        let conflicts = stmt
            .query_map(params![owner.as_str(), limit as i64], |row| {
                let owner: String = row.get(1)?;
                let collection: String = row.get(2)?;
                let remote: String = row.get(4)?;
                Ok(SyncConflict {
                    id: row.get(0)?,
                    owner_id: OwnerId::new(owner).map_err(|e| conversion_error(1, e))?,
                    collection: collection.parse().map_err(|e| conversion_error(2, e))?,
                    local_id: LocalId(row.get(3)?),
                    remote_id: RemoteId::new(remote).map_err(|e| conversion_error(4, e))?,
                    local_updated_at: row.get(5)?,
                    remote_updated_at: row.get(6)?,
                    resolved_at: row.get(7)?,
                    policy: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }
}

/// Apply a patch to a record.
///
/// User edits (no `sync_state` in the patch) mark the record `local` and bump
/// `updated_at`; reconciliation patches leave `updated_at` untouched.
fn apply_patch(mut record: Record, patch: &RecordPatch, now: i64) -> Result<Record> {
    if let Some(fields) = &patch.fields {
        ensure_collection(record.collection(), fields)?;
        fields.validate()?;
        record.fields = fields.clone();
    }

    if let Some(remote_id) = &patch.remote_id {
        match &record.remote_id {
            Some(current) if current != remote_id => {
                return Err(Error::Validation(format!(
                    "{} {} is already bound to remote id {current}",
                    record.collection().singular(),
                    record.local_id
                )));
            }
            _ => record.remote_id = Some(remote_id.clone()),
        }
    }

    let state = patch.sync_state.unwrap_or(SyncState::Local);
    if state == SyncState::Synced && record.remote_id.is_none() {
        return Err(Error::Validation(format!(
            "{} {} cannot be synced without a remote id",
            record.collection().singular(),
            record.local_id
        )));
    }
    record.sync_state = state;

    if !patch.is_reconciliation() {
        record.updated_at = Some(now);
    }
    Ok(record)
}

fn ensure_collection(collection: Collection, fields: &RecordFields) -> Result<()> {
    if fields.collection() == collection {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{} fields cannot be stored in {collection}",
            fields.collection().singular()
        )))
    }
}

/// Text columns matched by a search term
const fn searchable_columns(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::Ideas => &[
            "title",
            "content_idea",
            "context",
            "problem",
            "discovery",
            "teaching_angle",
            "hook",
        ],
        Collection::Drafts => &["content"],
    }
}

const fn sort_column(collection: Collection, field: SortField) -> &'static str {
    match (field, collection) {
        (SortField::CreatedAt, _) => "created_at",
        (SortField::UpdatedAt, _) => "COALESCE(updated_at, created_at)",
        (SortField::Title, Collection::Ideas) => "title COLLATE NOCASE",
        (SortField::Title, Collection::Drafts) => "content COLLATE NOCASE",
    }
}

/// Read a timestamp column in any stored representation as Unix milliseconds
fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<i64>> {
    Ok(RawTimestamp::from_value_ref(row.get_ref(idx)?).map(|raw| raw.normalize_or_epoch()))
}

fn conversion_error(idx: usize, error: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Sort, SortDirection};
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn owner() -> OwnerId {
        OwnerId::new("user-1").unwrap()
    }

    fn idea(title: &str) -> RecordFields {
        RecordFields::Idea(IdeaFields::titled(title))
    }

    fn remote(id: &str, created_at: i64, fields: RecordFields) -> RemoteRecord {
        RemoteRecord {
            remote_id: RemoteId::new(id).unwrap(),
            created_at: RawTimestamp::Millis(created_at),
            updated_at: None,
            fields,
        }
    }

    #[test]
    fn test_create_and_find() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let created = repo.create(&owner(), &idea("Borrow checker")).unwrap();
        assert_eq!(created.sync_state, SyncState::Local);
        assert!(created.remote_id.is_none());

        let found = repo
            .find(Collection::Ideas, created.local_id, &owner())
            .unwrap()
            .unwrap();
        assert_eq!(found, created);
    }

    #[test]
    fn test_create_rejects_missing_title() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let result = repo.create(&owner(), &idea("  "));
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(repo.count(Collection::Ideas, &owner()).unwrap(), 0);
    }

    #[test]
    fn test_local_ids_are_not_reused() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let first = repo.create(&owner(), &idea("a")).unwrap();
        repo.hard_delete(Collection::Ideas, first.local_id, &owner())
            .unwrap();
        let second = repo.create(&owner(), &idea("b")).unwrap();
        assert!(second.local_id > first.local_id);
    }

    #[test]
    fn test_other_owners_are_invisible() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let other = OwnerId::new("user-2").unwrap();

        let record = repo.create(&owner(), &idea("mine")).unwrap();
        assert!(repo
            .find(Collection::Ideas, record.local_id, &other)
            .unwrap()
            .is_none());
        assert_eq!(repo.count(Collection::Ideas, &other).unwrap(), 0);
    }

    #[test]
    fn test_query_paginates_newest_first() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        for i in 0..25 {
            repo.insert_synced(
                Collection::Ideas,
                &owner(),
                &remote(&format!("r{i}"), 1000 + i, idea(&format!("idea {i}"))),
            )
            .unwrap();
        }

        let page = repo
            .query(
                Collection::Ideas,
                &owner(),
                &RecordQuery::default().with_page(2, 10),
            )
            .unwrap();
        assert_eq!(page.total, 25);
        let titles: Vec<_> = page.items.iter().map(|r| r.fields.headline()).collect();
        assert_eq!(titles.first(), Some(&"idea 14"));
        assert_eq!(titles.last(), Some(&"idea 5"));
        assert_eq!(titles.len(), 10);
    }

    #[test]
    fn test_query_ties_break_by_insertion_order() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        for name in ["first", "second", "third"] {
            repo.insert_synced(
                Collection::Ideas,
                &owner(),
                &remote(name, 500, idea(name)),
            )
            .unwrap();
        }

        let page = repo
            .query(Collection::Ideas, &owner(), &RecordQuery::default())
            .unwrap();
        let titles: Vec<_> = page.items.iter().map(|r| r.fields.headline()).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_query_search_is_case_insensitive_and_skips_code() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let mut with_hook = IdeaFields::titled("Lifetimes");
        with_hook.hook = "Why does RUST care?".into();
        repo.create(&owner(), &RecordFields::Idea(with_hook)).unwrap();

        let mut with_code = IdeaFields::titled("Snippet");
        with_code.code = "fn rust() {}".into();
        repo.create(&owner(), &RecordFields::Idea(with_code)).unwrap();

        let page = repo
            .query(
                Collection::Ideas,
                &owner(),
                &RecordQuery::default().with_search("rust"),
            )
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].fields.headline(), "Lifetimes");
    }

    #[test]
    fn test_query_search_folds_non_ascii_case() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        repo.create(&owner(), &idea("ÉCOLE notes")).unwrap();
        repo.create(&owner(), &idea("plain")).unwrap();

        for term in ["ÉCOLE", "école", "ÉcOlE"] {
            let page = repo
                .query(
                    Collection::Ideas,
                    &owner(),
                    &RecordQuery::default().with_search(term),
                )
                .unwrap();
            assert_eq!(page.total, 1, "search {term:?}");
            assert_eq!(page.items[0].fields.headline(), "ÉCOLE notes");
        }
    }

    #[test]
    fn test_query_filters_drafts_by_idea_and_date() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let mut linked = DraftFields::new("linked");
        linked.idea_id = Some(LocalId(7));
        repo.insert_synced(
            Collection::Drafts,
            &owner(),
            &remote("d1", 100, RecordFields::Draft(linked)),
        )
        .unwrap();
        repo.insert_synced(
            Collection::Drafts,
            &owner(),
            &remote("d2", 200, RecordFields::Draft(DraftFields::new("loose"))),
        )
        .unwrap();

        let by_idea = repo
            .query(
                Collection::Drafts,
                &owner(),
                &RecordQuery::default().with_idea(LocalId(7)),
            )
            .unwrap();
        assert_eq!(by_idea.total, 1);

        let by_date = repo
            .query(
                Collection::Drafts,
                &owner(),
                &RecordQuery::default().with_created_range(Some(150), Some(200)),
            )
            .unwrap();
        assert_eq!(by_date.total, 1);
        assert_eq!(by_date.items[0].fields.headline(), "loose");
    }

    #[test]
    fn test_query_sorts_by_title_ascending() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        for title in ["beta", "Alpha", "gamma"] {
            repo.create(&owner(), &idea(title)).unwrap();
        }

        let sort = Sort {
            field: SortField::Title,
            direction: SortDirection::Ascending,
        };
        let page = repo
            .query(
                Collection::Ideas,
                &owner(),
                &RecordQuery::default().with_sort(sort),
            )
            .unwrap();
        let titles: Vec<_> = page.items.iter().map(|r| r.fields.headline()).collect();
        assert_eq!(titles, vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_user_edit_bumps_updated_at_and_marks_local() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let synced = repo
            .insert_synced(Collection::Ideas, &owner(), &remote("r1", 1, idea("old")))
            .unwrap();

        let updated = repo
            .update(
                Collection::Ideas,
                synced.local_id,
                &owner(),
                &RecordPatch::fields(idea("new")),
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.sync_state, SyncState::Local);
        assert!(updated.updated_at.is_some());
        assert_eq!(updated.remote_id, synced.remote_id);
        assert_eq!(updated.fields.headline(), "new");
    }

    #[test]
    fn test_update_rejects_rebinding_remote_id() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let synced = repo
            .insert_synced(Collection::Ideas, &owner(), &remote("r1", 1, idea("x")))
            .unwrap();

        let result = repo.update(
            Collection::Ideas,
            synced.local_id,
            &owner(),
            &RecordPatch::mark_synced(RemoteId::new("r2").unwrap()),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_update_rejects_synced_without_remote_id() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let record = repo.create(&owner(), &idea("x")).unwrap();

        let patch = RecordPatch {
            sync_state: Some(SyncState::Synced),
            ..RecordPatch::default()
        };
        let result = repo.update(Collection::Ideas, record.local_id, &owner(), &patch);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_update_missing_record_returns_none() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let result = repo
            .update(
                Collection::Drafts,
                LocalId(99),
                &owner(),
                &RecordPatch::fields(RecordFields::Draft(DraftFields::new("x"))),
            )
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_mark_synced_keeps_updated_at() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let record = repo.create(&owner(), &idea("x")).unwrap();

        let synced = repo
            .update(
                Collection::Ideas,
                record.local_id,
                &owner(),
                &RecordPatch::mark_synced(RemoteId::new("r1").unwrap()),
            )
            .unwrap()
            .unwrap();
        assert_eq!(synced.sync_state, SyncState::Synced);
        assert_eq!(synced.updated_at, None);
    }

    #[test]
    fn test_soft_delete_creates_pending_tombstone() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let synced = repo
            .insert_synced(Collection::Ideas, &owner(), &remote("r1", 1, idea("x")))
            .unwrap();

        let tombstone = repo
            .soft_delete(Collection::Ideas, synced.local_id, &owner())
            .unwrap()
            .unwrap();
        assert!(tombstone.deleted);
        assert!(tombstone.deleted_at.is_some());
        assert_eq!(tombstone.sync_state, SyncState::Local);

        assert_eq!(repo.count(Collection::Ideas, &owner()).unwrap(), 0);
        let pending = repo.pending_for_sync(&owner()).unwrap();
        assert_eq!(pending.deletes.len(), 1);
        assert!(pending.creates_and_edits.is_empty());
    }

    #[test]
    fn test_pending_for_sync_spans_collections() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        repo.create(&owner(), &idea("i")).unwrap();
        repo.create(&owner(), &RecordFields::Draft(DraftFields::new("d")))
            .unwrap();
        repo.insert_synced(Collection::Ideas, &owner(), &remote("r1", 1, idea("s")))
            .unwrap();

        let pending = repo.pending_for_sync(&owner()).unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_overwrite_from_remote_keeps_local_id() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let synced = repo
            .insert_synced(Collection::Ideas, &owner(), &remote("r1", 1, idea("old")))
            .unwrap();

        let mut newer = remote("r1", 1, idea("new"));
        newer.updated_at = Some(RawTimestamp::Millis(50));
        let overwritten = repo
            .overwrite_from_remote(Collection::Ideas, synced.local_id, &owner(), &newer)
            .unwrap();

        assert_eq!(overwritten.local_id, synced.local_id);
        let found = repo
            .find(Collection::Ideas, synced.local_id, &owner())
            .unwrap()
            .unwrap();
        assert_eq!(found.fields.headline(), "new");
        assert_eq!(found.updated_at, Some(50));
    }

    #[test]
    fn test_insert_synced_rejects_wrong_collection() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let result = repo.insert_synced(Collection::Drafts, &owner(), &remote("r1", 1, idea("x")));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_delete_all_only_touches_owner() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let other = OwnerId::new("user-2").unwrap();
        repo.create(&owner(), &idea("a")).unwrap();
        repo.create(&owner(), &RecordFields::Draft(DraftFields::new("b")))
            .unwrap();
        repo.create(&other, &idea("c")).unwrap();

        assert_eq!(repo.delete_all(&owner()).unwrap(), 2);
        assert_eq!(repo.count(Collection::Ideas, &other).unwrap(), 1);
    }

    #[test]
    fn test_normalize_timestamps_rewrites_legacy_text() {
        let db = setup();
        db.connection()
            .execute(
                "INSERT INTO ideas (owner_id, created_at, updated_at, title)
                 VALUES ('user-1', '1970-01-02T00:00:00Z', '{\"seconds\": 3, \"nanoseconds\": 0}', 'legacy')",
                [],
            )
            .unwrap();
        let repo = SqliteRecordRepository::new(db.connection());

        assert_eq!(repo.normalize_timestamps(Collection::Ideas, &owner()).unwrap(), 1);
        assert_eq!(repo.normalize_timestamps(Collection::Ideas, &owner()).unwrap(), 0);

        let stored: (String, i64) = db
            .connection()
            .query_row(
                "SELECT typeof(created_at), updated_at FROM ideas",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(stored, ("integer".to_string(), 3000));
    }

    #[test]
    fn test_conflict_log_round_trip() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());
        let conflict = SyncConflict {
            id: 0,
            owner_id: owner(),
            collection: Collection::Ideas,
            local_id: LocalId(3),
            remote_id: RemoteId::new("r3").unwrap(),
            local_updated_at: 1000,
            remote_updated_at: 1500,
            resolved_at: 2000,
            policy: "local-wins".into(),
        };

        let id = repo.record_conflict(&conflict).unwrap();
        let listed = repo.list_conflicts(&owner(), 10).unwrap();
        assert_eq!(listed, vec![SyncConflict { id, ..conflict }]);
    }
}
