//! Merge resolver: local + remote + conflicts -> one snapshot.
//!
//! Only messages are reconciled. The file tree and settings of `local` are
//! carried over untouched; their conflicts are stamped `Local`. Files are
//! derived from message artifacts, so replaying them here would apply the same
//! mutation twice.
//!
//! # Resolution rules
//!
//! | Conflict | Resolution | Effect |
//! |----------|------------|--------|
//! | version | `Merge` | last-write-wins on change timestamp, ties go to remote |
//! | version | `Local` / `Remote` | that side's value |
//! | delete | `Manual` | nothing applied, counted as unresolved |
//! | delete | `Local` / `Remote` | that side's state (edited version or deletion) |
//! | delete | `Merge` | keep both: the edited version survives under a restored id |

use super::tracker::message_from_value;
use crate::types::{
    Change, ChangeType, Conflict, ConflictType, EntityKind, Message, ProjectSnapshot, Resolution,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Result of one merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub snapshot: ProjectSnapshot,
    /// Input conflicts stamped with the resolution actually applied
    pub conflicts: Vec<Conflict>,
    /// Conflicts left `Manual` for the caller to decide
    pub unresolved: usize,
}

/// Merge `remote` into `local` under `conflicts`.
///
/// Deterministic, and idempotent: merging the returned snapshot again with
/// the same `remote` and `conflicts` yields the same snapshot.
pub fn merge_changes(
    local: &ProjectSnapshot,
    remote: &ProjectSnapshot,
    conflicts: &[Conflict],
) -> MergeOutcome {
    let mut merged = local.clone();

    let contested: HashSet<&str> = conflicts
        .iter()
        .filter(|c| c.entity() == EntityKind::Message)
        .map(|c| c.remote.entity_id.as_str())
        .collect();

    for message in &remote.messages {
        if !contested.contains(message.id.as_str()) {
            upsert(&mut merged.messages, message.clone());
        }
    }

    let mut stamped = Vec::with_capacity(conflicts.len());
    let mut unresolved = 0;

    for conflict in conflicts {
        let mut conflict = conflict.clone();

        let applied = if conflict.entity() != EntityKind::Message {
            Some(Resolution::Local)
        } else if conflict.conflict_type == ConflictType::DeleteConflict {
            resolve_delete(&mut merged.messages, &conflict)
        } else {
            resolve_version(&mut merged.messages, remote, &conflict)
        };

        match applied {
            Some(resolution) => conflict.resolution = resolution,
            None => {
                tracing::debug!(entity_id = %conflict.entity_id(), "Leaving conflict for manual resolution");
                unresolved += 1;
            }
        }
        stamped.push(conflict);
    }

    merged.messages.sort_by_key(|m| m.timestamp);
    merged.updated_at = local.updated_at.max(remote.updated_at);

    MergeOutcome {
        snapshot: merged,
        conflicts: stamped,
        unresolved,
    }
}

fn resolve_version(
    messages: &mut Vec<Message>,
    remote: &ProjectSnapshot,
    conflict: &Conflict,
) -> Option<Resolution> {
    let winner = match conflict.resolution {
        Resolution::Manual => return None,
        Resolution::Local => Resolution::Local,
        Resolution::Remote => Resolution::Remote,
        // Strictly newer local keeps local.
        Resolution::Merge if conflict.local.timestamp > conflict.remote.timestamp => {
            Resolution::Local
        }
        Resolution::Merge => Resolution::Remote,
    };

    if winner == Resolution::Remote {
        let incoming = remote
            .message(&conflict.remote.entity_id)
            .cloned()
            .or_else(|| message_from_value(&conflict.remote.new_value));
        if let Some(message) = incoming {
            upsert(messages, message);
        }
    }
    Some(winner)
}

fn resolve_delete(messages: &mut Vec<Message>, conflict: &Conflict) -> Option<Resolution> {
    match conflict.resolution {
        Resolution::Manual => None,
        Resolution::Local => {
            apply_side(messages, &conflict.local);
            Some(Resolution::Local)
        }
        Resolution::Remote => {
            apply_side(messages, &conflict.remote);
            Some(Resolution::Remote)
        }
        Resolution::Merge => {
            let edit = if conflict.local.change_type == ChangeType::Delete {
                &conflict.remote
            } else {
                &conflict.local
            };
            remove(messages, conflict.entity_id());
            if let Some(mut survivor) = message_from_value(&edit.new_value) {
                survivor.id = restored_id(&survivor);
                upsert(messages, survivor);
            }
            Some(Resolution::Merge)
        }
    }
}

fn apply_side(messages: &mut Vec<Message>, change: &Change) {
    match change.change_type {
        ChangeType::Delete => remove(messages, &change.entity_id),
        ChangeType::Create | ChangeType::Update => {
            if let Some(message) = message_from_value(&change.new_value) {
                upsert(messages, message);
            }
        }
    }
}

/// `<id>-restored-<8 hex>`, stable for a given surviving version.
fn restored_id(survivor: &Message) -> String {
    let mut hasher = Sha256::new();
    hasher.update(survivor.id.as_bytes());
    hasher.update([0]);
    hasher.update(survivor.role.as_str().as_bytes());
    hasher.update(survivor.timestamp.to_le_bytes());
    hasher.update(survivor.content.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-restored-{}", survivor.id, &digest[..8])
}

fn upsert(messages: &mut Vec<Message>, message: Message) {
    match messages.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => *existing = message,
        None => messages.push(message),
    }
}

fn remove(messages: &mut Vec<Message>, id: &str) {
    messages.retain(|m| m.id != id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{compare_projects, detect_conflicts};
    use crate::types::Role;

    fn msg(id: &str, content: &str, timestamp: i64) -> Message {
        Message {
            id: id.to_string(),
            role: Role::Assistant,
            content: content.to_string(),
            timestamp,
            artifacts: vec![],
        }
    }

    fn snapshot(messages: Vec<Message>, updated_at: i64) -> ProjectSnapshot {
        let mut s = ProjectSnapshot::new("p1", "demo", "me");
        s.messages = messages;
        s.updated_at = updated_at;
        s
    }

    fn two_way(local: &ProjectSnapshot, remote: &ProjectSnapshot) -> Vec<Conflict> {
        detect_conflicts(
            &compare_projects(remote, local, "local"),
            &compare_projects(local, remote, "remote"),
        )
    }

    fn against_base(
        base: &ProjectSnapshot,
        local: &ProjectSnapshot,
        remote: &ProjectSnapshot,
    ) -> Vec<Conflict> {
        detect_conflicts(
            &compare_projects(base, local, "local"),
            &compare_projects(base, remote, "remote"),
        )
    }

    #[test]
    fn test_remote_wins_with_higher_timestamp() {
        let local = snapshot(vec![msg("m1", "hi", 100)], 1_000);
        let remote = snapshot(vec![msg("m1", "hi there", 200)], 2_000);

        let conflicts = two_way(&local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::VersionConflict);

        let outcome = merge_changes(&local, &remote, &conflicts);
        assert_eq!(outcome.snapshot.messages.len(), 1);
        assert_eq!(outcome.snapshot.messages[0].content, "hi there");
        assert_eq!(outcome.snapshot.updated_at, 2_000);
        assert_eq!(outcome.conflicts[0].resolution, Resolution::Remote);
        assert_eq!(outcome.unresolved, 0);
    }

    #[test]
    fn test_newer_local_is_kept() {
        let local = snapshot(vec![msg("m1", "mine", 300)], 3_000);
        let remote = snapshot(vec![msg("m1", "theirs", 200)], 2_000);

        let outcome = merge_changes(&local, &remote, &two_way(&local, &remote));
        assert_eq!(outcome.snapshot.messages[0].content, "mine");
        assert_eq!(outcome.conflicts[0].resolution, Resolution::Local);
        assert_eq!(outcome.snapshot.updated_at, 3_000);
    }

    #[test]
    fn test_timestamp_tie_goes_to_remote() {
        let local = snapshot(vec![msg("m1", "mine", 200)], 1);
        let remote = snapshot(vec![msg("m1", "theirs", 200)], 1);

        let outcome = merge_changes(&local, &remote, &two_way(&local, &remote));
        assert_eq!(outcome.snapshot.messages[0].content, "theirs");
    }

    #[test]
    fn test_fast_path_unions_messages_in_time_order() {
        let local = snapshot(vec![msg("a", "A", 10), msg("c", "C", 30)], 1);
        let remote = snapshot(vec![msg("b", "B", 20), msg("c", "C", 30)], 1);

        let outcome = merge_changes(&local, &remote, &two_way(&local, &remote));
        let ids: Vec<&str> = outcome.snapshot.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_merge_is_deterministic_and_idempotent() {
        let local = snapshot(vec![msg("m1", "hi", 100), msg("l", "local only", 150)], 1_000);
        let remote = snapshot(vec![msg("m1", "hi there", 200), msg("r", "remote only", 50)], 2_000);
        let conflicts = two_way(&local, &remote);

        let first = merge_changes(&local, &remote, &conflicts);
        let again = merge_changes(&local, &remote, &conflicts);
        assert_eq!(first, again);

        let second = merge_changes(&first.snapshot, &remote, &conflicts);
        assert_eq!(second.snapshot, first.snapshot);
    }

    #[test]
    fn test_manual_delete_conflict_is_left_unresolved() {
        let base = snapshot(vec![msg("m1", "draft", 100)], 1_000);
        let local = snapshot(vec![], 1_500);
        let remote = snapshot(vec![msg("m1", "edited", 200)], 2_000);

        let conflicts = against_base(&base, &local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::DeleteConflict);

        let outcome = merge_changes(&local, &remote, &conflicts);
        assert_eq!(outcome.unresolved, 1);
        assert_eq!(outcome.conflicts[0].resolution, Resolution::Manual);
        assert!(outcome.snapshot.messages.is_empty());
    }

    #[test]
    fn test_delete_conflict_explicit_sides() {
        let base = snapshot(vec![msg("m1", "draft", 100)], 1_000);
        let local = snapshot(vec![], 1_500);
        let remote = snapshot(vec![msg("m1", "edited", 200)], 2_000);

        let mut conflicts = against_base(&base, &local, &remote);
        conflicts[0].resolution = Resolution::Remote;
        let outcome = merge_changes(&local, &remote, &conflicts);
        assert_eq!(outcome.snapshot.messages.len(), 1);
        assert_eq!(outcome.snapshot.messages[0].content, "edited");

        conflicts[0].resolution = Resolution::Local;
        let outcome = merge_changes(&local, &remote, &conflicts);
        assert!(outcome.snapshot.messages.is_empty());
        assert_eq!(outcome.unresolved, 0);
    }

    #[test]
    fn test_keep_both_restores_edit_under_new_id() {
        let base = snapshot(vec![msg("m1", "draft", 100)], 1_000);
        let local = snapshot(vec![msg("m1", "edited locally", 300)], 3_000);
        let remote = snapshot(vec![], 2_000);

        let mut conflicts = against_base(&base, &local, &remote);
        conflicts[0].resolution = Resolution::Merge;

        let outcome = merge_changes(&local, &remote, &conflicts);
        assert_eq!(outcome.snapshot.messages.len(), 1);
        let restored = &outcome.snapshot.messages[0];
        assert!(restored.id.starts_with("m1-restored-"));
        assert_eq!(restored.id.len(), "m1-restored-".len() + 8);
        assert_eq!(restored.content, "edited locally");
        assert!(outcome.snapshot.message("m1").is_none());

        let again = merge_changes(&outcome.snapshot, &remote, &conflicts);
        assert_eq!(again.snapshot, outcome.snapshot);
    }

    #[test]
    fn test_setting_conflicts_keep_local() {
        let base = snapshot(vec![], 1);
        let mut local = base.clone();
        local.name = "local name".to_string();
        let mut remote = base.clone();
        remote.name = "remote name".to_string();

        let conflicts = against_base(&base, &local, &remote);
        assert_eq!(conflicts.len(), 1);

        let outcome = merge_changes(&local, &remote, &conflicts);
        assert_eq!(outcome.snapshot.name, "local name");
        assert_eq!(outcome.conflicts[0].resolution, Resolution::Local);
    }
}
