//! Database repository layer
//!
//! Provides query and insert operations for snapshots, materialized files
//! and sync history.

use crate::error::Result;
use crate::store::{lock, FileStore, SnapshotStore};
use crate::sync::SyncReport;
use crate::types::{now_millis, ProjectSnapshot};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Listing row for a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub updated_at: i64,
    pub message_count: i64,
}

/// One recorded sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    pub id: i64,
    pub project_id: String,
    pub started_at: i64,
    pub local_changes: i64,
    pub remote_changes: i64,
    pub conflicts: i64,
    pub unresolved: i64,
    pub remote_available: bool,
    pub failed: bool,
    pub error: Option<String>,
}

impl SyncRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            started_at: row.get(2)?,
            local_changes: row.get(3)?,
            remote_changes: row.get(4)?,
            conflicts: row.get(5)?,
            unresolved: row.get(6)?,
            remote_available: row.get(7)?,
            failed: row.get(8)?,
            error: row.get(9)?,
        })
    }
}

/// Main database handle
pub struct Database {
    conn: Mutex<Connection>,
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL so a reader (`show`, `files`) never blocks a writer
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;  -- 16MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        super::schema::run_migrations(&conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        lock(&self.conn, "database")
    }

    // ============================================
    // Snapshot operations
    // ============================================

    /// All stored snapshots, most recently updated first
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, owner_id, updated_at,
                   COALESCE(json_array_length(data, '$.messages'), 0)
            FROM snapshots
            ORDER BY updated_at DESC, id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(SnapshotSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                owner_id: row.get(2)?,
                updated_at: row.get(3)?,
                message_count: row.get(4)?,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Delete a snapshot and its materialized files
    pub fn delete_project(&self, project_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM project_files WHERE project_id = ?1", [project_id])?;
        tx.execute("DELETE FROM snapshots WHERE id = ?1", [project_id])?;
        tx.commit()?;
        Ok(())
    }

    // ============================================
    // File operations
    // ============================================

    /// Upsert a file, returning whether its stored content changed.
    ///
    /// Identical content (by sha256) is not rewritten.
    pub fn upsert_file(&self, project_id: &str, path: &str, content: &str) -> Result<bool> {
        let hash = content_hash(content);
        let conn = self.conn()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT content_hash FROM project_files WHERE project_id = ?1 AND path = ?2",
                params![project_id, path],
                |r| r.get(0),
            )
            .optional()?;
        if existing.as_deref() == Some(hash.as_str()) {
            tracing::trace!(project_id = %project_id, path = %path, "File unchanged, skipping write");
            return Ok(false);
        }

        conn.execute(
            r#"
            INSERT INTO project_files (project_id, path, content, content_hash, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(project_id, path) DO UPDATE SET
                content = excluded.content,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
            params![project_id, path, content, hash, now_millis()],
        )?;
        Ok(true)
    }

    /// Stored sha256 of one file
    pub fn file_hash(&self, project_id: &str, path: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT content_hash FROM project_files WHERE project_id = ?1 AND path = ?2",
            params![project_id, path],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    // ============================================
    // Sync history
    // ============================================

    /// Record the outcome of one sync, returning the run id
    pub fn record_sync_run(
        &self,
        project_id: &str,
        started_at: i64,
        report: &SyncReport,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO sync_runs (project_id, started_at, local_changes, remote_changes,
                                   conflicts, unresolved, remote_available, failed, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                project_id,
                started_at,
                report.local_changes as i64,
                report.remote_changes as i64,
                report.conflicts as i64,
                report.unresolved as i64,
                report.remote_available,
                report.failed,
                report.error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent sync runs for a project, newest first
    pub fn recent_sync_runs(&self, project_id: &str, limit: usize) -> Result<Vec<SyncRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, project_id, started_at, local_changes, remote_changes,
                   conflicts, unresolved, remote_available, failed, error
            FROM sync_runs
            WHERE project_id = ?1
            ORDER BY started_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![project_id, limit as i64], SyncRun::from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

impl SnapshotStore for Database {
    fn get(&self, id: &str) -> Result<Option<ProjectSnapshot>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM snapshots WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn set(&self, id: &str, snapshot: &ProjectSnapshot) -> Result<()> {
        let data = serde_json::to_string(snapshot)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO snapshots (id, name, owner_id, updated_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner_id = excluded.owner_id,
                updated_at = excluded.updated_at,
                data = excluded.data
            "#,
            params![id, snapshot.name, snapshot.owner_id, snapshot.updated_at, data],
        )?;
        tracing::debug!(project_id = %id, messages = snapshot.messages.len(), "Stored snapshot");
        Ok(())
    }
}

impl FileStore for Database {
    fn put_file(&self, project_id: &str, path: &str, content: &str) -> Result<()> {
        self.upsert_file(project_id, path, content).map(|_| ())
    }

    fn remove_file(&self, project_id: &str, path: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM project_files WHERE project_id = ?1 AND path = ?2",
            params![project_id, path],
        )?;
        Ok(removed > 0)
    }

    fn get_file(&self, project_id: &str, path: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT content FROM project_files WHERE project_id = ?1 AND path = ?2",
            params![project_id, path],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    fn list_files(&self, project_id: &str) -> Result<BTreeMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT path, content FROM project_files WHERE project_id = ?1")?;
        let rows = stmt.query_map([project_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(Into::into)
    }
}
