//! # codeloom-core
//!
//! Core library for codeloom - turns streamed model output into a
//! multi-file project and keeps copies of that project in sync.
//!
//! This library provides:
//! - Domain types for projects, messages, changes and conflicts
//! - An incremental tag-stream parser fed from SSE or raw text
//! - A materializer that applies parser events to project state
//! - Change tracking, conflict detection and merging of snapshots
//! - Storage backends (SQLite, JSON directory, in-memory)
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Two pipelines share the snapshot model:
//! - **Ingest:** text chunks → parser → events → materializer → snapshot
//! - **Sync:** local + remote snapshot → changes ×2 → conflicts → merge → both stores
//!
//! ## Example
//!
//! ```rust,no_run
//! use codeloom_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, DeleteConflictPolicy};
pub use db::Database;
pub use error::{Error, Result};
pub use materialize::{normalize_path, reconcile_files, Materializer, ProjectState};
pub use store::{FileStore, JsonDirStore, MemoryStore, SnapshotStore};
pub use stream::{consume_stream, CancelFlag, EventSink, ParserEvent, StreamSummary, TagStreamParser};
pub use sync::{SyncEngine, SyncReport};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod materialize;
pub mod store;
pub mod stream;
pub mod sync;
pub mod types;
