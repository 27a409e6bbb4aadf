//! Conflict detection between two independently produced change sets.

use crate::config::DeleteConflictPolicy;
use crate::types::{Change, ChangeType, Conflict, ConflictType, Resolution};

/// Pair up changes that touch the same entity incompatibly.
///
/// Both sides updating the same field is a version conflict (auto-merged by
/// last-write-wins). A delete against an update is a delete conflict, left
/// `Manual`. Duplicate creates and duplicate deletes are idempotent and
/// never conflict.
pub fn detect_conflicts(local_changes: &[Change], remote_changes: &[Change]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for local in local_changes {
        for remote in remote_changes {
            if local.entity != remote.entity
                || local.entity_id != remote.entity_id
                || local.id == remote.id
            {
                continue;
            }

            let classified = match (local.change_type, remote.change_type) {
                (ChangeType::Update, ChangeType::Update) if local.field == remote.field => {
                    Some((ConflictType::VersionConflict, Resolution::Merge))
                }
                (ChangeType::Delete, ChangeType::Update) | (ChangeType::Update, ChangeType::Delete) => {
                    Some((ConflictType::DeleteConflict, Resolution::Manual))
                }
                _ => None,
            };

            if let Some((conflict_type, resolution)) = classified {
                tracing::debug!(
                    entity = local.entity.as_str(),
                    entity_id = %local.entity_id,
                    kind = conflict_type.as_str(),
                    "Detected conflict"
                );
                conflicts.push(Conflict {
                    change_id: local.id.clone(),
                    conflict_type,
                    local: local.clone(),
                    remote: remote.clone(),
                    resolution,
                });
            }
        }
    }

    conflicts
}

/// Stamp still-`Manual` delete conflicts with the configured default.
pub fn apply_delete_policy(conflicts: &mut [Conflict], policy: DeleteConflictPolicy) {
    let resolution = match policy {
        DeleteConflictPolicy::Manual => return,
        DeleteConflictPolicy::KeepBoth => Resolution::Merge,
        DeleteConflictPolicy::PreferLocal => Resolution::Local,
        DeleteConflictPolicy::PreferRemote => Resolution::Remote,
    };

    for conflict in conflicts.iter_mut().filter(|c| {
        c.conflict_type == ConflictType::DeleteConflict && c.resolution == Resolution::Manual
    }) {
        conflict.resolution = resolution;
    }
}
