//! Artifact materializer
//!
//! Applies parser events to the live project state and to durable
//! per-project file storage:
//!
//! | Event | Live state | Durable store |
//! |-------|------------|---------------|
//! | Narrative | assistant message | none |
//! | Thinking | system message | none |
//! | DependencyRequest | informational system message | none |
//! | FileWrite | upsert file, attach artifact | upsert |
//! | FileDelete | remove file, attach artifact | remove |
//! | FileRename | move content (warn if source missing) | move |
//!
//! The two sinks are not transactional with each other: the live map is
//! updated first, and a store failure is returned after it. The next sync
//! is what repairs any divergence.

use crate::error::Result;
use crate::store::FileStore;
use crate::stream::EventSink;
use crate::types::{
    build_file_tree, language_for_path, now_millis, ArtifactAction, CodeArtifact, Message,
    ProjectSnapshot, Role,
};
use std::collections::BTreeMap;

/// Normalize a model-supplied path into a project-relative key.
///
/// Returns `None` for paths that are empty or climb out of the project root.
pub fn normalize_path(raw: &str) -> Option<String> {
    let unified = raw.trim().replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Make the durable file store for `project_id` hold exactly `files`.
///
/// Returns the number of paths written or removed. This is the repair pass
/// run after a sync replaces the snapshot.
pub fn reconcile_files(
    store: &dyn FileStore,
    project_id: &str,
    files: &BTreeMap<String, String>,
) -> Result<usize> {
    let stored = store.list_files(project_id)?;
    let mut touched = 0;

    for (path, content) in files {
        if stored.get(path) != Some(content) {
            store.put_file(project_id, path, content)?;
            touched += 1;
        }
    }
    for path in stored.keys().filter(|p| !files.contains_key(*p)) {
        store.remove_file(project_id, path)?;
        touched += 1;
    }

    if touched > 0 {
        tracing::info!(project_id = %project_id, touched, "Reconciled file store with snapshot");
    }
    Ok(touched)
}

/// Transcript, file map and warnings accumulated for one project.
#[derive(Debug, Default, Clone)]
pub struct ProjectState {
    /// Messages appended by this materializer, in event order
    pub transcript: Vec<Message>,
    /// Normalized path -> content
    pub files: BTreeMap<String, String>,
    /// Non-fatal problems (dropped paths, renames of missing files)
    pub warnings: Vec<String>,
}

/// [`EventSink`] that materializes events for one project.
pub struct Materializer<'a> {
    project_id: String,
    state: ProjectState,
    store: &'a dyn FileStore,
    last_timestamp: i64,
}

impl<'a> Materializer<'a> {
    /// Start from an empty project.
    pub fn new(project_id: impl Into<String>, store: &'a dyn FileStore) -> Self {
        Self {
            project_id: project_id.into(),
            state: ProjectState::default(),
            store,
            last_timestamp: 0,
        }
    }

    /// Continue materializing on top of an existing snapshot.
    pub fn resume(base: &ProjectSnapshot, store: &'a dyn FileStore) -> Self {
        let last_timestamp = base
            .messages
            .iter()
            .map(|m| m.timestamp)
            .max()
            .unwrap_or(0);
        Self {
            project_id: base.id.clone(),
            state: ProjectState {
                files: base.files(),
                ..ProjectState::default()
            },
            store,
            last_timestamp,
        }
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn into_state(self) -> ProjectState {
        self.state
    }

    /// A new snapshot: `base` messages plus this transcript, file tree
    /// rebuilt from the live map, `updated_at` advanced monotonically.
    ///
    /// `base` should be the snapshot the materializer was resumed from.
    pub fn snapshot(&self, base: &ProjectSnapshot) -> ProjectSnapshot {
        let mut next = base.clone();
        next.messages.extend(self.state.transcript.iter().cloned());
        next.file_tree = build_file_tree(&self.state.files);
        next.touch(self.last_timestamp.max(now_millis()));
        next
    }

    fn next_timestamp(&mut self) -> i64 {
        let ts = now_millis().max(self.last_timestamp);
        self.last_timestamp = ts;
        ts
    }

    fn push_message(&mut self, role: Role, content: String) {
        let timestamp = self.next_timestamp();
        self.state
            .transcript
            .push(Message::new(role, content, timestamp));
    }

    fn warn(&mut self, warning: String) {
        tracing::warn!(project_id = %self.project_id, "{}", warning);
        self.state.warnings.push(warning);
    }

    fn normalized(&mut self, raw: &str, op: &str) -> Option<String> {
        let normalized = normalize_path(raw);
        if normalized.is_none() {
            self.warn(format!("{}: ignoring invalid path {:?}", op, raw));
        }
        normalized
    }

    /// An existing file that would make `path` both a file and a directory.
    ///
    /// `moving` is the source of a rename and does not count.
    fn collision(&self, path: &str, moving: Option<&str>) -> Option<String> {
        let counts = |p: &str| Some(p) != moving;

        let ancestor = path
            .match_indices('/')
            .map(|(i, _)| &path[..i])
            .find(|dir| counts(*dir) && self.state.files.contains_key(*dir));
        if let Some(dir) = ancestor {
            return Some(dir.to_string());
        }

        let nested = format!("{}/", path);
        self.state
            .files
            .range(nested.clone()..)
            .map(|(p, _)| p)
            .take_while(|p| p.starts_with(&nested))
            .find(|p| counts(p.as_str()))
            .cloned()
    }

    /// Record a file artifact on the latest assistant message.
    fn attach_artifact(&mut self, path: &str, content: &str, action: ArtifactAction) {
        let needs_message = !self
            .state
            .transcript
            .iter()
            .any(|m| m.role == Role::Assistant);
        if needs_message {
            self.push_message(Role::Assistant, String::new());
        }

        let artifact = CodeArtifact {
            id: uuid::Uuid::new_v4().to_string(),
            filename: path.to_string(),
            language: language_for_path(path).to_string(),
            content: content.to_string(),
            action,
        };

        if let Some(message) = self
            .state
            .transcript
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Assistant)
        {
            message.artifacts.push(artifact);
        }
    }
}

impl EventSink for Materializer<'_> {
    fn on_narrative(&mut self, text: &str) -> Result<()> {
        self.push_message(Role::Assistant, text.to_string());
        Ok(())
    }

    fn on_thinking(&mut self, text: &str) -> Result<()> {
        self.push_message(Role::System, text.to_string());
        Ok(())
    }

    fn on_write(&mut self, path: &str, content: &str) -> Result<()> {
        let Some(path) = self.normalized(path, "write") else {
            return Ok(());
        };
        if let Some(existing) = self.collision(&path, None) {
            self.warn(format!(
                "write: ignoring {:?}, it collides with existing file {:?}",
                path, existing
            ));
            return Ok(());
        }

        let action = if self.state.files.contains_key(&path) {
            ArtifactAction::Update
        } else {
            ArtifactAction::Create
        };
        self.state.files.insert(path.clone(), content.to_string());
        self.attach_artifact(&path, content, action);

        tracing::debug!(project_id = %self.project_id, path = %path, bytes = content.len(), "Materialized write");
        self.store.put_file(&self.project_id, &path, content)
    }

    fn on_delete(&mut self, path: &str) -> Result<()> {
        let Some(path) = self.normalized(path, "delete") else {
            return Ok(());
        };

        if self.state.files.remove(&path).is_none() {
            tracing::debug!(project_id = %self.project_id, path = %path, "Delete of absent file");
        }
        self.attach_artifact(&path, "", ArtifactAction::Delete);
        self.store.remove_file(&self.project_id, &path)?;
        Ok(())
    }

    fn on_rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let (Some(old_path), Some(new_path)) = (
            self.normalized(old_path, "rename"),
            self.normalized(new_path, "rename"),
        ) else {
            return Ok(());
        };
        if let Some(existing) = self.collision(&new_path, Some(&old_path)) {
            self.warn(format!(
                "rename: ignoring {:?} -> {:?}, it collides with existing file {:?}",
                old_path, new_path, existing
            ));
            return Ok(());
        }

        let Some(content) = self.state.files.remove(&old_path) else {
            self.warn(format!(
                "rename: source {:?} does not exist, skipping rename to {:?}",
                old_path, new_path
            ));
            return Ok(());
        };

        self.state.files.insert(new_path.clone(), content.clone());
        self.attach_artifact(&old_path, "", ArtifactAction::Delete);
        self.attach_artifact(&new_path, &content, ArtifactAction::Create);

        self.store.put_file(&self.project_id, &new_path, &content)?;
        self.store.remove_file(&self.project_id, &old_path)?;
        Ok(())
    }

    fn on_dependency(&mut self, package: &str) -> Result<()> {
        tracing::info!(project_id = %self.project_id, package = %package, "Dependency requested");
        self.push_message(Role::System, format!("dependency requested: {}", package));
        Ok(())
    }
}
