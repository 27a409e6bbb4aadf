//! Core domain types for codeloom
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Project** | A generated codebase: its chat transcript plus its file tree |
//! | **Snapshot** | A complete, self-contained copy of one project at a point in time |
//! | **Message** | One transcript entry, optionally carrying the file artifacts it produced |
//! | **Change** | A detected difference between two snapshots for one entity/field |
//! | **Conflict** | Two changes from different sources touching the same entity incompatibly |
//!
//! Snapshots are treated as immutable values: every mutation produces a new
//! snapshot rather than editing one in place. Structural equality on
//! [`Message`] is what the change tracker uses to detect updates.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Milliseconds since the Unix epoch, the unit for every timestamp here.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================
// Messages
// ============================================

/// Role of the message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Error,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Error => "error",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "error" => Ok(Role::Error),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// What a message did to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactAction {
    Create,
    Update,
    Delete,
}

/// A file produced (or removed) by an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub id: String,
    /// Normalized project-relative path
    pub filename: String,
    pub language: String,
    pub content: String,
    pub action: ArtifactAction,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<CodeArtifact>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp,
            artifacts: Vec::new(),
        }
    }
}

// ============================================
// File tree
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
}

/// A node of a project's file tree.
///
/// Directories never carry `content` and files never carry `children`; use
/// [`FileNode::file`] and [`FileNode::directory`] to keep it that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    /// `/`-join of every ancestor's name plus this node's
    pub path: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileNode {
    pub fn file(path: &str, content: impl Into<String>) -> Self {
        Self {
            name: leaf_name(path).to_string(),
            path: path.to_string(),
            kind: NodeKind::File,
            children: None,
            content: Some(content.into()),
        }
    }

    pub fn directory(path: &str, children: Vec<FileNode>) -> Self {
        Self {
            name: leaf_name(path).to_string(),
            path: path.to_string(),
            kind: NodeKind::Directory,
            children: Some(children),
            content: None,
        }
    }
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Build a nested file tree from a flat `path -> content` map.
///
/// Intermediate directories are synthesised from path segments. Siblings are
/// ordered directories first, then by name.
pub fn build_file_tree(files: &BTreeMap<String, String>) -> Vec<FileNode> {
    #[derive(Default)]
    struct Dir {
        dirs: BTreeMap<String, Dir>,
        files: BTreeMap<String, String>,
    }

    fn into_nodes(dir: Dir, prefix: &str) -> Vec<FileNode> {
        let join = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", prefix, name)
            }
        };

        let mut nodes = Vec::with_capacity(dir.dirs.len() + dir.files.len());
        for (name, sub) in dir.dirs {
            let path = join(&name);
            let children = into_nodes(sub, &path);
            nodes.push(FileNode::directory(&path, children));
        }
        for (name, content) in dir.files {
            nodes.push(FileNode::file(&join(&name), content));
        }
        nodes
    }

    let mut root = Dir::default();
    for (path, content) in files {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some(file_name) = segments.pop() else {
            continue;
        };
        let mut dir = &mut root;
        for segment in segments {
            dir = dir.dirs.entry(segment.to_string()).or_default();
        }
        dir.files.insert(file_name.to_string(), content.clone());
    }

    into_nodes(root, "")
}

/// Flatten a file tree back into a `path -> content` map.
pub fn flatten_file_tree(nodes: &[FileNode]) -> BTreeMap<String, String> {
    fn walk(nodes: &[FileNode], out: &mut BTreeMap<String, String>) {
        for node in nodes {
            match node.kind {
                NodeKind::File => {
                    out.insert(node.path.clone(), node.content.clone().unwrap_or_default());
                }
                NodeKind::Directory => {
                    if let Some(children) = &node.children {
                        walk(children, out);
                    }
                }
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(nodes, &mut out);
    out
}

/// Language label for a file, derived from its extension.
pub fn language_for_path(path: &str) -> &'static str {
    let name = leaf_name(path);
    if name == "Dockerfile" {
        return "dockerfile";
    }
    let ext = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return "plaintext",
    };
    match ext.as_str() {
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "tsx",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "jsx",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "json" => "json",
        "md" => "markdown",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        _ => "plaintext",
    }
}

// ============================================
// Project snapshots
// ============================================

/// A complete copy of one project's transcript and file tree.
///
/// `updated_at` never decreases across mutations applied by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    /// Ordered by creation
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub file_tree: Vec<FileNode>,
    /// Milliseconds since the Unix epoch
    pub updated_at: i64,
}

impl ProjectSnapshot {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: owner_id.into(),
            messages: Vec::new(),
            file_tree: Vec::new(),
            updated_at: now_millis(),
        }
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Flattened `path -> content` view of the file tree
    pub fn files(&self) -> BTreeMap<String, String> {
        flatten_file_tree(&self.file_tree)
    }

    /// Advance `updated_at` to `now`, never moving it backwards.
    pub fn touch(&mut self, now: i64) {
        self.updated_at = self.updated_at.max(now);
    }
}

// ============================================
// Changes and conflicts
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Message,
    Artifact,
    File,
    Setting,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Message => "message",
            EntityKind::Artifact => "artifact",
            EntityKind::File => "file",
            EntityKind::Setting => "setting",
        }
    }
}

/// A fact about a difference between two snapshots. Produced, never applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub entity: EntityKind,
    pub entity_id: String,
    pub field: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub timestamp: i64,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    VersionConflict,
    DeleteConflict,
    UpdateConflict,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::VersionConflict => "version-conflict",
            ConflictType::DeleteConflict => "delete-conflict",
            ConflictType::UpdateConflict => "update-conflict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Local,
    Remote,
    Merge,
    Manual,
}

/// Two changes touching the same entity. Lives for one sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Id of the local change
    pub change_id: String,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub local: Change,
    pub remote: Change,
    pub resolution: Resolution,
}

impl Conflict {
    pub fn entity(&self) -> EntityKind {
        self.local.entity
    }

    pub fn entity_id(&self) -> &str {
        &self.local.entity_id
    }
}
