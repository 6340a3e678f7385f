//! Database migrations

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, V1_STATEMENTS)?;
    }
    if version < 2 {
        apply(conn, 2, V2_STATEMENTS)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Apply one migration atomically and record its version
fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: idea and draft collections
const V1_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS ideas (
        local_id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        remote_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER,
        sync_state TEXT NOT NULL DEFAULT 'local'
            CHECK (sync_state IN ('local', 'synced')),
        title TEXT NOT NULL,
        content_idea TEXT NOT NULL DEFAULT '',
        context TEXT NOT NULL DEFAULT '',
        problem TEXT NOT NULL DEFAULT '',
        discovery TEXT NOT NULL DEFAULT '',
        teaching_angle TEXT NOT NULL DEFAULT '',
        code TEXT NOT NULL DEFAULT '',
        hook TEXT NOT NULL DEFAULT '',
        CHECK (sync_state = 'local' OR remote_id IS NOT NULL)
    )",
    "CREATE INDEX IF NOT EXISTS idx_ideas_owner ON ideas(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_ideas_created ON ideas(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_ideas_owner_sync ON ideas(owner_id, sync_state)",
    "CREATE INDEX IF NOT EXISTS idx_ideas_owner_created ON ideas(owner_id, created_at)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_ideas_owner_remote
        ON ideas(owner_id, remote_id) WHERE remote_id IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS drafts (
        local_id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        remote_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER,
        sync_state TEXT NOT NULL DEFAULT 'local'
            CHECK (sync_state IN ('local', 'synced')),
        content TEXT NOT NULL,
        idea_id INTEGER,
        CHECK (sync_state = 'local' OR remote_id IS NOT NULL)
    )",
    "CREATE INDEX IF NOT EXISTS idx_drafts_owner ON drafts(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_drafts_created ON drafts(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_drafts_owner_sync ON drafts(owner_id, sync_state)",
    "CREATE INDEX IF NOT EXISTS idx_drafts_owner_created ON drafts(owner_id, created_at)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_drafts_owner_remote
        ON drafts(owner_id, remote_id) WHERE remote_id IS NOT NULL",
];

/// Version 2: conflict log for conflict-aware merges
const V2_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        local_id INTEGER NOT NULL,
        remote_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        local_updated_at INTEGER NOT NULL,
        remote_updated_at INTEGER NOT NULL,
        resolved_at INTEGER NOT NULL,
        policy TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_owner ON sync_conflicts(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
];
