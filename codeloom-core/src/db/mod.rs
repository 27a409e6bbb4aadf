//! Database layer for codeloom
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Snapshot and materialized-file storage behind the store traits
//! - Sync run history

pub mod repo;
pub mod schema;

pub use repo::{Database, SnapshotSummary, SyncRun};
