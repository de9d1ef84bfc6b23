//! Wire types for the push/pull sync protocol.

use serde::{Deserialize, Serialize};

use crate::model::op::{OpKind, OpsQueueItem};
use crate::sync::normalize::{InboxRow, LinkRow, MetaRow, NoteRow, PlanRow, TaskRow};

/// A single op as transmitted to `POST /sync/push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOp {
    pub op_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub op_type: OpKind,
    pub payload: serde_json::Value,
}

impl From<&OpsQueueItem> for PushOp {
    fn from(op: &OpsQueueItem) -> Self {
        Self {
            op_id: op.op_id.clone(),
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            op_type: op.op_type,
            payload: op.payload.clone(),
        }
    }
}

/// `POST /sync/push` response body.
#[derive(Debug, Default, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub acked: Vec<String>,
}

/// `GET /sync/pull` response body. Every table the remote owns, as full
/// rows, plus the cursor to resume from next time.
#[derive(Debug, Default, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub tasks: Vec<TaskRow>,
    #[serde(default)]
    pub notes: Vec<NoteRow>,
    #[serde(default)]
    pub links: Vec<LinkRow>,
    #[serde(default)]
    pub plans: Vec<PlanRow>,
    #[serde(default, alias = "inboxItems")]
    pub inbox_items: Vec<InboxRow>,
    #[serde(default, alias = "settings")]
    pub meta: Vec<MetaRow>,
    #[serde(default, rename = "newCursor")]
    pub new_cursor: Option<String>,
}

/// Extract a human-readable message from a failed response: an `error` or
/// `message` JSON field when present, the raw body text otherwise, the
/// status line as a last resort.
pub(crate) async fn read_response_error(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !text.is_empty() {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
            if let Some(error) = parsed.get("error").and_then(|v| v.as_str()) {
                return error.to_string();
            }
            if let Some(message) = parsed.get("message").and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
        return text;
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_op_serializes_camel_case() {
        let op = PushOp {
            op_id: "op-1".into(),
            entity_type: "task".into(),
            entity_id: "t1".into(),
            op_type: OpKind::Create,
            payload: serde_json::json!({"id": "t1"}),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"opId\":\"op-1\""));
        assert!(json.contains("\"entityType\":\"task\""));
        assert!(json.contains("\"opType\":\"create\""));
    }

    #[test]
    fn pull_response_accepts_both_namings() {
        let snake = r#"{
            "tasks": [], "notes": [], "links": [],
            "inbox_items": [{"id": "i1", "text": "hi"}],
            "meta": [{"meta_key": "wakeTime", "value": "07:00"}],
            "newCursor": "2024-01-10T00:00:00.000Z"
        }"#;
        let parsed: PullResponse = serde_json::from_str(snake).unwrap();
        assert_eq!(parsed.inbox_items.len(), 1);
        assert_eq!(parsed.meta.len(), 1);
        assert_eq!(parsed.new_cursor.as_deref(), Some("2024-01-10T00:00:00.000Z"));

        let camel = r#"{
            "tasks": [], "notes": [], "links": [],
            "inboxItems": [{"id": "i1", "text": "hi"}],
            "settings": [{"key": "wakeTime", "value": "07:00"}]
        }"#;
        let parsed: PullResponse = serde_json::from_str(camel).unwrap();
        assert_eq!(parsed.inbox_items.len(), 1);
        assert_eq!(parsed.meta.len(), 1);
        assert!(parsed.new_cursor.is_none());
    }

    #[test]
    fn ack_response_defaults_to_empty() {
        let parsed: AckResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.acked.is_empty());
    }
}
