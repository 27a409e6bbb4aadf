//! Integration tests for the ingest and sync pipelines
//!
//! These tests use SSE captures in `tests/fixtures/` to verify the
//! end-to-end flow from framed model output to stored snapshots, and
//! the convergence of two devices syncing through a shared directory.

use codeloom_core::stream::sse_text_stream;
use codeloom_core::{
    consume_stream, ArtifactAction, CancelFlag, Database, Error, FileStore, JsonDirStore,
    Materializer, Message, ParserEvent, ProjectSnapshot, Role, SnapshotStore, SyncEngine,
};
use std::path::PathBuf;
use tempfile::TempDir;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn fixture(name: &str) -> Vec<u8> {
    codeloom_core::logging::init_test();
    std::fs::read(fixture_path(name)).unwrap()
}

fn test_db() -> Database {
    codeloom_core::logging::init_test();
    let db = Database::open_in_memory().unwrap();
    db.migrate().unwrap();
    db
}

/// Stream an SSE capture into `db` the way `codeloom ingest` does.
async fn ingest(db: &Database, project_id: &str, input: &[u8], read_size: usize) -> ProjectSnapshot {
    let base = db
        .get(project_id)
        .unwrap()
        .unwrap_or_else(|| ProjectSnapshot::new(project_id, "todo", "me"));

    let mut materializer = Materializer::resume(&base, db);
    consume_stream(
        sse_text_stream(input, read_size),
        &mut materializer,
        &CancelFlag::new(),
    )
    .await
    .unwrap();

    let next = materializer.snapshot(&base);
    db.set(project_id, &next).unwrap();
    next
}

fn append_message(db: &Database, project_id: &str, content: &str, offset_ms: i64) {
    let mut snapshot = db.get(project_id).unwrap().unwrap();
    let timestamp = snapshot.updated_at + offset_ms;
    snapshot
        .messages
        .push(Message::new(Role::User, content, timestamp));
    snapshot.touch(timestamp);
    db.set(project_id, &snapshot).unwrap();
}

// ============================================
// Ingest
// ============================================

#[tokio::test]
async fn test_ingest_fixture_into_database() {
    let db = test_db();
    let snapshot = ingest(&db, "todo", &fixture("todo-app.sse"), 4096).await;

    let files = db.list_files("todo").unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files.get("src/main.ts").map(String::as_str), Some("console.log(\"todo\");"));
    assert_eq!(files.get("src/app.css").map(String::as_str), Some("body { margin: 0; }"));
    assert_eq!(snapshot.files(), files);

    let entries: Vec<(Role, &str)> = snapshot
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Role::Assistant, "I'll set up a small todo app."),
            (Role::System, "Need an entry point and styles."),
            (Role::System, "dependency requested: zod"),
            (Role::Assistant, "Done."),
        ]
    );

    let first: Vec<(&str, ArtifactAction)> = snapshot.messages[0]
        .artifacts
        .iter()
        .map(|a| (a.filename.as_str(), a.action))
        .collect();
    assert_eq!(
        first,
        vec![
            ("src/main.ts", ArtifactAction::Create),
            ("src/style.css", ArtifactAction::Create),
        ]
    );
    assert_eq!(snapshot.messages[3].artifacts.len(), 2);

    let stored = db.get("todo").unwrap().unwrap();
    assert_eq!(stored, snapshot);
}

#[tokio::test]
async fn test_read_size_does_not_change_events() {
    let input = fixture("todo-app.sse");

    let mut whole: Vec<ParserEvent> = Vec::new();
    consume_stream(sse_text_stream(&input[..], 4096), &mut whole, &CancelFlag::new())
        .await
        .unwrap();

    for read_size in [1, 2, 7, 64] {
        let mut split: Vec<ParserEvent> = Vec::new();
        consume_stream(sse_text_stream(&input[..], read_size), &mut split, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(split, whole, "read size {}", read_size);
    }
    assert_eq!(whole.len(), 7);
}

#[tokio::test]
async fn test_error_frame_keeps_earlier_writes() {
    let db = test_db();
    let base = ProjectSnapshot::new("p1", "demo", "me");
    let input = fixture("aborted.sse");

    let mut materializer = Materializer::new("p1", &db);
    let result = consume_stream(
        sse_text_stream(&input[..], 16),
        &mut materializer,
        &CancelFlag::new(),
    )
    .await;
    assert!(matches!(result, Err(Error::Stream(msg)) if msg == "upstream overloaded"));

    assert_eq!(db.get_file("p1", "a.txt").unwrap().as_deref(), Some("A"));
    assert!(db.get_file("p1", "b.txt").unwrap().is_none());
    assert!(materializer.snapshot(&base).files().contains_key("a.txt"));
}

#[tokio::test]
async fn test_second_ingest_updates_existing_files() {
    let db = test_db();
    ingest(&db, "todo", &fixture("todo-app.sse"), 64).await;

    let follow_up: &[u8] = b"data: {\"text\": \"Tweak. <write file_path=\\\"src/main.ts\\\">export {};</write>\"}\n\ndata: [DONE]\n\n";
    let snapshot = ingest(&db, "todo", follow_up, 64).await;

    assert_eq!(snapshot.messages.len(), 5);
    let last = snapshot.messages.last().unwrap();
    assert_eq!(last.artifacts[0].action, ArtifactAction::Update);
    assert_eq!(snapshot.files().get("src/main.ts").map(String::as_str), Some("export {};"));
    assert_eq!(snapshot.files().len(), 2);
}

// ============================================
// Sync
// ============================================

#[tokio::test]
async fn test_two_devices_converge_through_directory_remote() {
    let remote_dir = TempDir::new().unwrap();
    let remote = JsonDirStore::new(remote_dir.path());
    let laptop = test_db();
    let desktop = test_db();

    ingest(&laptop, "todo", &fixture("todo-app.sse"), 4096).await;

    let pushed = SyncEngine::new(&laptop, &remote, "laptop").sync("todo");
    assert!(pushed.written && !pushed.failed);
    assert!(remote_dir.path().join("todo.json").exists());

    let adopted = SyncEngine::new(&desktop, &remote, "desktop").sync("todo");
    assert!(adopted.written);
    assert_eq!(desktop.get("todo").unwrap(), laptop.get("todo").unwrap());

    append_message(&laptop, "todo", "add due dates", 1);
    append_message(&desktop, "todo", "add dark mode", 2);

    for (db, user) in [(&laptop, "laptop"), (&desktop, "desktop"), (&laptop, "laptop")] {
        let report = SyncEngine::new(db, &remote, user).sync("todo");
        assert!(!report.failed, "{:?}", report.error);
        assert_eq!(report.conflicts, 0);
    }

    let ids = |db: &Database| -> Vec<String> {
        db.get("todo")
            .unwrap()
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.id)
            .collect()
    };
    assert_eq!(ids(&laptop), ids(&desktop));
    assert_eq!(ids(&laptop).len(), 6);
}

#[tokio::test]
async fn test_sync_runs_are_recorded() {
    let remote_dir = TempDir::new().unwrap();
    let remote = JsonDirStore::new(remote_dir.path());
    let db = test_db();
    ingest(&db, "todo", &fixture("todo-app.sse"), 4096).await;

    let report = SyncEngine::new(&db, &remote, "me").sync("todo");
    db.record_sync_run("todo", 1_000, &report).unwrap();

    std::fs::write(remote_dir.path().join("todo.json"), "{truncated").unwrap();
    let report = SyncEngine::new(&db, &remote, "me").sync("todo");
    assert!(!report.remote_available);
    db.record_sync_run("todo", 2_000, &report).unwrap();

    let runs = db.recent_sync_runs("todo", 10).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(!runs[0].remote_available);
    assert!(runs[1].remote_available);
}
