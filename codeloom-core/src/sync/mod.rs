//! Snapshot synchronisation
//!
//! One sync of one project runs, in order:
//!
//! ```text
//! fetch remote ─► compare ×2 ─► detect conflicts ─► delete policy ─► merge ─► write local + remote
//! ```
//!
//! A failed remote fetch degrades to "local as-is". A merge that leaves
//! manual conflicts writes nothing, so neither store ever holds a half-decided
//! snapshot. Overlapping syncs of the same project are not guarded here.

mod conflicts;
mod merge;
mod tracker;

pub use conflicts::{apply_delete_policy, detect_conflicts};
pub use merge::{merge_changes, MergeOutcome};
pub use tracker::{compare_projects, message_from_value, MESSAGE_FIELD, NAME_FIELD};

use crate::config::DeleteConflictPolicy;
use crate::error::{Error, Result};
use crate::store::SnapshotStore;
use crate::types::ProjectSnapshot;

/// What one sync did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// The authoritative snapshot after the sync
    pub snapshot: Option<ProjectSnapshot>,
    /// Changes introduced by the local side
    pub local_changes: usize,
    /// Changes introduced by the remote side
    pub remote_changes: usize,
    pub conflicts: usize,
    pub unresolved: usize,
    /// Whether the remote store answered the fetch
    pub remote_available: bool,
    /// Whether any store was written
    pub written: bool,
    pub failed: bool,
    pub error: Option<String>,
}

/// Two-party sync between a local and a remote [`SnapshotStore`].
pub struct SyncEngine<'a> {
    local: &'a dyn SnapshotStore,
    remote: &'a dyn SnapshotStore,
    user_id: String,
    delete_policy: DeleteConflictPolicy,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        local: &'a dyn SnapshotStore,
        remote: &'a dyn SnapshotStore,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            user_id: user_id.into(),
            delete_policy: DeleteConflictPolicy::default(),
        }
    }

    pub fn with_delete_policy(mut self, policy: DeleteConflictPolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Sync one project, reporting failures instead of returning them.
    ///
    /// On failure the local snapshot (if readable) is reported as
    /// authoritative with zero conflicts.
    pub fn sync(&self, project_id: &str) -> SyncReport {
        match self.try_sync(project_id) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(project_id = %project_id, error = %e, "Sync failed, keeping local snapshot");
                SyncReport {
                    snapshot: self.local.get(project_id).ok().flatten(),
                    failed: true,
                    error: Some(e.to_string()),
                    ..SyncReport::default()
                }
            }
        }
    }

    /// Sync one project, propagating store errors.
    pub fn try_sync(&self, project_id: &str) -> Result<SyncReport> {
        let local = self.local.get(project_id)?;

        let (remote, remote_available) = match self.remote.get(project_id) {
            Ok(remote) => (remote, true),
            Err(e) => {
                tracing::warn!(project_id = %project_id, error = %e, "Remote fetch failed, using local as-is");
                (None, false)
            }
        };

        let mut report = SyncReport {
            remote_available,
            ..SyncReport::default()
        };

        match (local, remote) {
            (None, None) => Err(Error::ProjectNotFound(project_id.to_string())),
            (Some(local), None) => {
                if remote_available {
                    tracing::info!(project_id = %project_id, "Remote has no copy, pushing local");
                    self.remote.set(project_id, &local)?;
                    report.local_changes = local.messages.len();
                    report.written = true;
                }
                report.snapshot = Some(local);
                Ok(report)
            }
            (None, Some(remote)) => {
                tracing::info!(project_id = %project_id, "Local has no copy, adopting remote");
                self.local.set(project_id, &remote)?;
                report.remote_changes = remote.messages.len();
                report.written = true;
                report.snapshot = Some(remote);
                Ok(report)
            }
            (Some(local), Some(remote)) => {
                self.reconcile(project_id, local, remote, report)
            }
        }
    }

    fn reconcile(
        &self,
        project_id: &str,
        local: ProjectSnapshot,
        remote: ProjectSnapshot,
        mut report: SyncReport,
    ) -> Result<SyncReport> {
        let local_changes = compare_projects(&remote, &local, &self.user_id);
        let remote_changes = compare_projects(&local, &remote, &self.user_id);

        let mut conflicts = detect_conflicts(&local_changes, &remote_changes);
        apply_delete_policy(&mut conflicts, self.delete_policy);

        let outcome = merge_changes(&local, &remote, &conflicts);

        report.local_changes = local_changes.len();
        report.remote_changes = remote_changes.len();
        report.conflicts = outcome.conflicts.len();
        report.unresolved = outcome.unresolved;

        if outcome.unresolved > 0 {
            tracing::warn!(
                project_id = %project_id,
                unresolved = outcome.unresolved,
                "Manual conflicts remain, leaving both stores untouched"
            );
            report.snapshot = Some(local);
            return Ok(report);
        }

        if local_changes.is_empty() && remote_changes.is_empty() {
            tracing::debug!(project_id = %project_id, "Already in sync");
            report.snapshot = Some(outcome.snapshot);
            return Ok(report);
        }

        self.local.set(project_id, &outcome.snapshot)?;
        self.remote.set(project_id, &outcome.snapshot)?;
        report.written = true;

        tracing::info!(
            project_id = %project_id,
            local_changes = report.local_changes,
            remote_changes = report.remote_changes,
            conflicts = report.conflicts,
            "Synced project"
        );
        report.snapshot = Some(outcome.snapshot);
        Ok(report)
    }
}
