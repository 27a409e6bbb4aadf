//! Per-project writer locks shared by `ingest` and `sync`.
//!
//! Lock strategy:
//! - One lock file per (database, project) pair under `$XDG_RUNTIME_DIR/codeloom`.
//! - Locks are advisory OS file locks (flock), held until the guard drops.
//! - Readers (`show`, `files`, `list`) never take a lock.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// Held while this process writes one project.
pub struct ProjectLock {
    file: File,
    path: PathBuf,
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Take the writer lock for `project_id` in the database at `db_path`.
///
/// Fails immediately if another process holds it.
pub fn acquire_project_lock(db_path: &Path, project_id: &str) -> Result<ProjectLock> {
    match try_acquire_lock(db_path, project_id)? {
        Some(lock) => Ok(lock),
        None => anyhow::bail!(
            "project {} is being written by another codeloom process",
            project_id
        ),
    }
}

fn try_acquire_lock(db_path: &Path, project_id: &str) -> Result<Option<ProjectLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(db_path, project_id));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner info for debugging.
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={} project={}", std::process::id(), project_id);
            let _ = file.flush();

            tracing::debug!(path = %path.display(), project_id = %project_id, "Acquired project lock");
            Ok(Some(ProjectLock { file, path }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("codeloom");
    dir
}

/// Project ids are free-form, so both parts are hashed into the name.
///
/// The digest must not depend on the build: every codeloom binary on the
/// machine has to agree on the name.
fn scoped_lock_filename(db_path: &Path, project_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(db_path.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(project_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("project-{}.lock", &digest[..16])
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("codeloom project locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let db_path = PathBuf::from(format!("/tmp/codeloom-lock-test-{}.db", std::process::id()));

        let first = acquire_project_lock(&db_path, "p1").unwrap();
        assert!(acquire_project_lock(&db_path, "p1").is_err());
        let other = acquire_project_lock(&db_path, "p2").unwrap();

        drop(first);
        let again = acquire_project_lock(&db_path, "p1").unwrap();
        drop(again);
        drop(other);
    }

    #[test]
    fn test_lock_names_are_scoped() {
        let a = scoped_lock_filename(Path::new("/a.db"), "p1");
        let b = scoped_lock_filename(Path::new("/b.db"), "p1");
        let c = scoped_lock_filename(Path::new("/a.db"), "p2");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("project-") && a.ends_with(".lock"));
    }

    #[test]
    fn test_lock_name_is_stable_across_builds() {
        assert_eq!(
            scoped_lock_filename(Path::new("/data/codeloom.db"), "todo"),
            "project-7dc530390228f49f.lock"
        );
    }
}
