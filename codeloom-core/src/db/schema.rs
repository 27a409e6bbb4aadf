//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: snapshots and materialized files
    r#"
    -- Whole-project snapshots, one row per project.
    -- `data` is the serialized snapshot; the other columns are for listing.
    CREATE TABLE IF NOT EXISTS snapshots (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        owner_id         TEXT NOT NULL,
        updated_at       INTEGER NOT NULL,
        data             JSON NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_snapshots_updated ON snapshots(updated_at DESC);

    -- Durable per-project file store, keyed by normalized path
    CREATE TABLE IF NOT EXISTS project_files (
        project_id       TEXT NOT NULL,
        path             TEXT NOT NULL,
        content          TEXT NOT NULL,
        content_hash     TEXT NOT NULL,
        updated_at       INTEGER NOT NULL,
        PRIMARY KEY (project_id, path)
    );
    "#,
    // Version 2: sync history
    r#"
    CREATE TABLE IF NOT EXISTS sync_runs (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id       TEXT NOT NULL,
        started_at       INTEGER NOT NULL,
        local_changes    INTEGER NOT NULL DEFAULT 0,
        remote_changes   INTEGER NOT NULL DEFAULT 0,
        conflicts        INTEGER NOT NULL DEFAULT 0,
        unresolved       INTEGER NOT NULL DEFAULT 0,
        remote_available INTEGER NOT NULL DEFAULT 1,
        failed           INTEGER NOT NULL DEFAULT 0,
        error            TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_sync_runs_project ON sync_runs(project_id, started_at DESC);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
