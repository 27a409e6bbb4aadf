//! Change tracker: one-directional differencing of two snapshots.
//!
//! `compare_projects(a, b)` answers "what would turn `a` into `b`". Callers
//! run it twice with the arguments swapped to get both parties' change sets.

use crate::types::{Change, ChangeType, EntityKind, Message, ProjectSnapshot};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Field name carried by message-level changes
pub const MESSAGE_FIELD: &str = "message";
/// Field name carried by project-name changes
pub const NAME_FIELD: &str = "name";

/// Changes that turn `local` into `remote`, attributed to `user_id`.
///
/// Order: scalar settings, then `remote.messages` order (creates and
/// updates), then `local.messages` order (deletes).
pub fn compare_projects(
    local: &ProjectSnapshot,
    remote: &ProjectSnapshot,
    user_id: &str,
) -> Vec<Change> {
    let mut changes = Vec::new();

    if local.name != remote.name {
        changes.push(change(
            ChangeType::Update,
            EntityKind::Setting,
            &local.id,
            NAME_FIELD,
            Some(Value::String(local.name.clone())),
            Some(Value::String(remote.name.clone())),
            remote.updated_at,
            user_id,
        ));
    }

    let local_by_id: HashMap<&str, &Message> =
        local.messages.iter().map(|m| (m.id.as_str(), m)).collect();

    for message in &remote.messages {
        match local_by_id.get(message.id.as_str()) {
            None => changes.push(change(
                ChangeType::Create,
                EntityKind::Message,
                &message.id,
                MESSAGE_FIELD,
                None,
                message_value(message),
                message.timestamp,
                user_id,
            )),
            Some(existing) if *existing != message => changes.push(change(
                ChangeType::Update,
                EntityKind::Message,
                &message.id,
                MESSAGE_FIELD,
                message_value(existing),
                message_value(message),
                message.timestamp,
                user_id,
            )),
            Some(_) => {}
        }
    }

    let remote_ids: HashSet<&str> = remote.messages.iter().map(|m| m.id.as_str()).collect();
    for message in &local.messages {
        if !remote_ids.contains(message.id.as_str()) {
            changes.push(change(
                ChangeType::Delete,
                EntityKind::Message,
                &message.id,
                MESSAGE_FIELD,
                message_value(message),
                None,
                message.timestamp,
                user_id,
            ));
        }
    }

    tracing::trace!(
        from = %local.id,
        changes = changes.len(),
        "Compared snapshots"
    );
    changes
}

/// Decode a message carried in a change value.
pub fn message_from_value(value: &Option<Value>) -> Option<Message> {
    value
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn message_value(message: &Message) -> Option<Value> {
    serde_json::to_value(message).ok()
}

#[allow(clippy::too_many_arguments)]
fn change(
    change_type: ChangeType,
    entity: EntityKind,
    entity_id: &str,
    field: &str,
    old_value: Option<Value>,
    new_value: Option<Value>,
    timestamp: i64,
    user_id: &str,
) -> Change {
    Change {
        id: uuid::Uuid::new_v4().to_string(),
        change_type,
        entity,
        entity_id: entity_id.to_string(),
        field: field.to_string(),
        old_value,
        new_value,
        timestamp,
        user_id: user_id.to_string(),
    }
}
