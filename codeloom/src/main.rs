//! codeloom - stream generated projects from model output and keep them in sync
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/codeloom/data.db (~/.local/share/codeloom/data.db)
//! - Logs: $XDG_STATE_HOME/codeloom/codeloom.log (~/.local/state/codeloom/codeloom.log)
//! - Config: $XDG_CONFIG_HOME/codeloom/config.toml (~/.config/codeloom/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use codeloom_core::stream::{raw_text_stream, sse_text_stream};
use codeloom_core::{
    consume_stream, now_millis, reconcile_files, ArtifactAction, CancelFlag, Config, Database,
    EventSink, FileStore, JsonDirStore, Materializer, ProjectSnapshot, SnapshotStore,
    StreamSummary, SyncEngine,
};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_project_lock;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncRead;

#[derive(Parser)]
#[command(name = "codeloom")]
#[command(about = "Stream generated projects from model output and keep them in sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a captured model response into a project
    Ingest(IngestArgs),
    /// Reconcile a project with a shared remote directory
    Sync(SyncArgs),
    /// List a project's materialized files
    Files(ProjectArg),
    /// Print a project's transcript
    Show(ShowArgs),
    /// List stored projects
    List,
}

#[derive(Args)]
struct ProjectArg {
    /// Project id
    #[arg(short, long)]
    project: String,
}

#[derive(Args)]
struct IngestArgs {
    /// Project id (created if it does not exist)
    #[arg(short, long)]
    project: String,

    /// Display name for a new project
    #[arg(long)]
    name: Option<String>,

    /// Input file, or `-` for stdin
    #[arg(default_value = "-")]
    input: String,

    /// Input is plain model text rather than SSE frames
    #[arg(long)]
    raw: bool,
}

#[derive(Args)]
struct SyncArgs {
    /// Project id
    #[arg(short, long)]
    project: String,

    /// Remote directory (overrides sync.remote_dir)
    #[arg(long)]
    remote_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ShowArgs {
    /// Project id
    #[arg(short, long)]
    project: String,

    /// Print the raw snapshot as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        codeloom_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match cli.command {
        Command::Ingest(args) => run_ingest(&config, &db, &db_path, args).await,
        Command::Sync(args) => run_sync(&config, &db, &db_path, args),
        Command::Files(args) => run_files(&db, &args.project),
        Command::Show(args) => run_show(&db, &args),
        Command::List => run_list(&db),
    }
}

// ============================================
// ingest
// ============================================

async fn run_ingest(config: &Config, db: &Database, db_path: &Path, args: IngestArgs) -> Result<()> {
    let _lock = acquire_project_lock(db_path, &args.project)?;

    let mut base = match db.get(&args.project).context("failed to load project")? {
        Some(existing) => existing,
        None => ProjectSnapshot::new(
            args.project.as_str(),
            args.name.as_deref().unwrap_or(&args.project),
            config.sync.user_id.as_str(),
        ),
    };
    if let Some(name) = args.name.as_deref().filter(|n| *n != base.name) {
        base.name = name.to_string();
        base.touch(now_millis());
    }

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        handler_flag.cancel();
    })
    .context("failed to set Ctrl-C handler")?;

    let reader = open_input(&args.input).await?;
    let read_size = config.stream.read_size;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Streaming into {}", args.project));

    let mut materializer = Materializer::resume(&base, db);
    let result = {
        let mut sink = ProgressSink {
            inner: &mut materializer,
            pb: &pb,
            events: 0,
        };
        if args.raw {
            consume_stream(raw_text_stream(reader, read_size), &mut sink, &cancel).await
        } else {
            consume_stream(sse_text_stream(reader, read_size), &mut sink, &cancel).await
        }
    };
    pb.finish_and_clear();

    // Whatever was applied before a cancel or a source error is kept.
    let next = materializer.snapshot(&base);
    db.set(&args.project, &next)
        .context("failed to store snapshot")?;

    let state = materializer.state();
    for warning in &state.warnings {
        eprintln!("warning: {}", warning);
    }

    let summary: StreamSummary = result.context("stream aborted")?;
    print_ingest_summary(&args.project, &summary, state.transcript.len(), &next);
    Ok(())
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("failed to open input {}", input))?;
    Ok(Box::new(file))
}

fn print_ingest_summary(
    project_id: &str,
    summary: &StreamSummary,
    new_messages: usize,
    snapshot: &ProjectSnapshot,
) {
    if summary.cancelled {
        println!("Ingest cancelled; partial results kept.");
    } else {
        println!("Ingest complete:");
    }
    println!("  Project:       {}", project_id);
    println!("  Chunks read:   {}", summary.chunks);
    println!("  Events:        {}", summary.events);
    println!("  New messages:  {}", new_messages);
    println!("  Files:         {}", snapshot.files().len());
    tracing::info!(
        project_id = %project_id,
        chunks = summary.chunks,
        events = summary.events,
        cancelled = summary.cancelled,
        "Ingest finished"
    );
}

/// Forwards events and reports progress on the spinner.
struct ProgressSink<'a, S: ?Sized> {
    inner: &'a mut S,
    pb: &'a ProgressBar,
    events: u64,
}

impl<S: EventSink + ?Sized> ProgressSink<'_, S> {
    fn tick(&mut self, what: &str) {
        self.events += 1;
        self.pb
            .set_message(format!("{} events, last: {}", self.events, what));
    }
}

impl<S: EventSink + ?Sized> EventSink for ProgressSink<'_, S> {
    fn on_narrative(&mut self, text: &str) -> codeloom_core::Result<()> {
        self.inner.on_narrative(text)?;
        self.tick("narrative");
        Ok(())
    }

    fn on_thinking(&mut self, text: &str) -> codeloom_core::Result<()> {
        self.inner.on_thinking(text)?;
        self.tick("thinking");
        Ok(())
    }

    fn on_write(&mut self, path: &str, content: &str) -> codeloom_core::Result<()> {
        self.inner.on_write(path, content)?;
        self.tick(&format!("write {}", path));
        Ok(())
    }

    fn on_delete(&mut self, path: &str) -> codeloom_core::Result<()> {
        self.inner.on_delete(path)?;
        self.tick(&format!("delete {}", path));
        Ok(())
    }

    fn on_rename(&mut self, old_path: &str, new_path: &str) -> codeloom_core::Result<()> {
        self.inner.on_rename(old_path, new_path)?;
        self.tick(&format!("rename {} -> {}", old_path, new_path));
        Ok(())
    }

    fn on_dependency(&mut self, package: &str) -> codeloom_core::Result<()> {
        self.inner.on_dependency(package)?;
        self.tick(&format!("dependency {}", package));
        Ok(())
    }
}

// ============================================
// sync
// ============================================

fn run_sync(config: &Config, db: &Database, db_path: &Path, args: SyncArgs) -> Result<()> {
    let remote_dir = args
        .remote_dir
        .or_else(|| config.sync.remote_dir.clone())
        .context("no remote directory: pass --remote-dir or set sync.remote_dir")?;

    let _lock = acquire_project_lock(db_path, &args.project)?;
    let remote = JsonDirStore::new(&remote_dir);

    let started_at = now_millis();
    let report = SyncEngine::new(db, &remote, config.sync.user_id.as_str())
        .with_delete_policy(config.sync.delete_conflicts)
        .sync(&args.project);
    db.record_sync_run(&args.project, started_at, &report)
        .context("failed to record sync run")?;

    if report.failed {
        anyhow::bail!(
            "sync failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    if report.written {
        if let Some(snapshot) = &report.snapshot {
            reconcile_files(db, &args.project, &snapshot.files())
                .context("failed to update materialized files")?;
        }
    }

    println!("Sync complete:");
    println!("  Remote:          {}", remote_dir.display());
    println!(
        "  Remote status:   {}",
        if report.remote_available { "available" } else { "unavailable (kept local)" }
    );
    println!("  Local changes:   {}", report.local_changes);
    println!("  Remote changes:  {}", report.remote_changes);
    println!("  Conflicts:       {}", report.conflicts);
    if report.unresolved > 0 {
        println!(
            "  Unresolved:      {} (nothing written; set sync.delete_conflicts to resolve)",
            report.unresolved
        );
    }
    Ok(())
}

// ============================================
// read-only views
// ============================================

fn run_files(db: &Database, project_id: &str) -> Result<()> {
    require_project(db, project_id)?;
    let files = db
        .list_files(project_id)
        .context("failed to list files")?;

    if files.is_empty() {
        println!("No files in project {}", project_id);
        return Ok(());
    }
    for (path, content) in &files {
        println!("{:>8}  {}", content.len(), path);
    }
    Ok(())
}

fn run_show(db: &Database, args: &ShowArgs) -> Result<()> {
    let snapshot = require_project(db, &args.project)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("{} ({})", snapshot.name, snapshot.id);
    println!("Updated: {}", format_millis(snapshot.updated_at));
    println!();
    for message in &snapshot.messages {
        println!("[{}] {}:", format_millis(message.timestamp), message.role);
        if !message.content.is_empty() {
            for line in message.content.lines() {
                println!("  {}", line);
            }
        }
        for artifact in &message.artifacts {
            let marker = match artifact.action {
                ArtifactAction::Create => '+',
                ArtifactAction::Update => '~',
                ArtifactAction::Delete => '-',
            };
            println!("  {} {}", marker, artifact.filename);
        }
    }
    Ok(())
}

fn run_list(db: &Database) -> Result<()> {
    let projects = db.list_snapshots().context("failed to list projects")?;
    if projects.is_empty() {
        println!("No projects");
        return Ok(());
    }
    for project in projects {
        println!(
            "{}  {}  {} message(s)  updated {}",
            project.id,
            project.name,
            project.message_count,
            format_millis(project.updated_at)
        );
    }
    Ok(())
}

fn require_project(db: &Database, project_id: &str) -> Result<ProjectSnapshot> {
    db.get(project_id)
        .context("failed to load project")?
        .with_context(|| format!("project not found: {}", project_id))
}

fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
