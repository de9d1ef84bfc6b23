//! Outbox entries — pending mutations awaiting transmission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity types the sync protocol understands.
pub const SYNCABLE_ENTITY_TYPES: &[&str] = &["task", "note", "link", "inbox", "meta", "plan"];

/// Whether an entity type participates in sync. Unknown types are a
/// forward-compatibility escape hatch: enqueue ignores them and push drops
/// them from the queue without transmission.
pub fn is_syncable_entity_type(entity_type: &str) -> bool {
    SYNCABLE_ENTITY_TYPES.contains(&entity_type)
}

/// The kind of mutation an op describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

/// Outbox entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Pending,
    Acked,
}

/// A durable outbox entry. Append/delete-only: created on every local
/// mutation of a syncable entity, removed once the remote acknowledges it,
/// never mutated in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsQueueItem {
    /// Client-generated unique id.
    pub op_id: String,
    /// Kept as a plain string so entries written by newer clients survive
    /// in the queue until push drops them.
    pub entity_type: String,
    pub entity_id: String,
    pub op_type: OpKind,
    /// Full entity snapshot at enqueue time, or a `{updatedAt}` deletion
    /// marker.
    pub payload: serde_json::Value,
    pub status: OpStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syncable_set_is_closed() {
        for t in ["task", "note", "link", "inbox", "meta", "plan"] {
            assert!(is_syncable_entity_type(t));
        }
        assert!(!is_syncable_entity_type("widget"));
        assert!(!is_syncable_entity_type(""));
        assert!(!is_syncable_entity_type("Task"));
    }

    #[test]
    fn op_kind_serde_lowercase() {
        assert_eq!(serde_json::to_string(&OpKind::Create).unwrap(), "\"create\"");
        let parsed: OpKind = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(parsed, OpKind::Delete);
    }
}
