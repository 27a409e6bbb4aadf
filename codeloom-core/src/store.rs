//! Storage seams for snapshots and materialized files
//!
//! The sync engine only needs `get`/`set` by project id; the materializer
//! only needs per-project file upserts. [`crate::Database`] implements both
//! on SQLite; [`JsonDirStore`] keeps one JSON document per project in a
//! directory (typically a shared or mounted folder used as the remote);
//! [`MemoryStore`] backs tests and short-lived tools.

use crate::error::{Error, Result};
use crate::types::ProjectSnapshot;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Key-value snapshot persistence addressed by project id.
pub trait SnapshotStore {
    fn get(&self, id: &str) -> Result<Option<ProjectSnapshot>>;

    fn set(&self, id: &str, snapshot: &ProjectSnapshot) -> Result<()>;
}

/// Durable per-project file storage keyed by normalized path.
pub trait FileStore {
    fn put_file(&self, project_id: &str, path: &str, content: &str) -> Result<()>;

    /// Returns whether a file was removed.
    fn remove_file(&self, project_id: &str, path: &str) -> Result<bool>;

    fn get_file(&self, project_id: &str, path: &str) -> Result<Option<String>>;

    fn list_files(&self, project_id: &str) -> Result<BTreeMap<String, String>>;
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Store(format!("{} lock poisoned", what)))
}

// ============================================
// In-memory store
// ============================================

/// Process-local store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, ProjectSnapshot>>,
    files: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one snapshot
    pub fn with_snapshot(snapshot: ProjectSnapshot) -> Self {
        let store = Self::new();
        if let Ok(mut snapshots) = store.snapshots.lock() {
            snapshots.insert(snapshot.id.clone(), snapshot);
        }
        store
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<ProjectSnapshot>> {
        Ok(lock(&self.snapshots, "snapshot")?.get(id).cloned())
    }

    fn set(&self, id: &str, snapshot: &ProjectSnapshot) -> Result<()> {
        lock(&self.snapshots, "snapshot")?.insert(id.to_string(), snapshot.clone());
        Ok(())
    }
}

impl FileStore for MemoryStore {
    fn put_file(&self, project_id: &str, path: &str, content: &str) -> Result<()> {
        lock(&self.files, "file")?
            .entry(project_id.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn remove_file(&self, project_id: &str, path: &str) -> Result<bool> {
        Ok(lock(&self.files, "file")?
            .get_mut(project_id)
            .map(|files| files.remove(path).is_some())
            .unwrap_or(false))
    }

    fn get_file(&self, project_id: &str, path: &str) -> Result<Option<String>> {
        Ok(lock(&self.files, "file")?
            .get(project_id)
            .and_then(|files| files.get(path).cloned()))
    }

    fn list_files(&self, project_id: &str) -> Result<BTreeMap<String, String>> {
        Ok(lock(&self.files, "file")?
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================
// JSON directory store
// ============================================

/// One `<id>.json` snapshot document per project inside `root`.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn document_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::Store(format!("invalid project id for file store: {:?}", id)));
        }
        Ok(self.root.join(format!("{}.json", id)))
    }
}

impl SnapshotStore for JsonDirStore {
    fn get(&self, id: &str) -> Result<Option<ProjectSnapshot>> {
        let path = self.document_path(id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn set(&self, id: &str, snapshot: &ProjectSnapshot) -> Result<()> {
        let path = self.document_path(id)?;
        std::fs::create_dir_all(&self.root)?;

        // Write-then-rename so readers never see a half-written document.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(project_id = %id, path = %path.display(), "Wrote snapshot document");
        Ok(())
    }
}
