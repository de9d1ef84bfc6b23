//! Row normalization at the sync boundary.
//!
//! The remote serves snake_case rows; older clients pushed camelCase
//! payloads. Both sides of the protocol funnel through these tagged row
//! types, which accept either naming and tolerate JSON arrays that arrive
//! as embedded strings (how SQLite TEXT columns come back), instead of
//! scattering field fallbacks through business logic.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::model::inbox::InboxItem;
use crate::model::link::NoteTaskLink;
use crate::model::note::Note;
use crate::model::plan::{Plan, PlanBlock, PlanDecision, PlanGoal, PlanPhase, PlanStatus};
use crate::model::task::{Recurrence, Subtask, Task, TaskStatus, build_time_label};
use crate::store::{RemoteLinkRow, RemoteMetaRow, parse_datetime};

/// Accept a JSON array directly or as a JSON-encoded string; junk becomes
/// empty rather than failing the whole row.
fn json_array<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(_) => serde_json::from_value(value).unwrap_or_default(),
        serde_json::Value::String(s) => serde_json::from_str(&s).unwrap_or_default(),
        _ => Vec::new(),
    })
}

/// Deserialize leniently, falling back to the type's default on unknown
/// values (e.g. a status variant added by a newer client).
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Accept SQLite's 0/1 integers, booleans, or stringly booleans.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        serde_json::Value::String(s) => s == "true" || s == "1",
        _ => false,
    })
}

/// Parse an optional timestamp field, treating empty strings as absent.
fn opt_ts(s: &Option<String>) -> Option<DateTime<Utc>> {
    match s.as_deref() {
        None | Some("") => None,
        Some(text) => Some(parse_datetime(text)),
    }
}

/// Parse a timestamp field, defaulting to now when missing.
fn ts_or_now(s: &Option<String>) -> DateTime<Utc> {
    opt_ts(s).unwrap_or_else(Utc::now)
}

/// A task row as served by pull or carried in a push payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "timeStart")]
    pub time_start: String,
    #[serde(default, alias = "timeEnd")]
    pub time_end: String,
    #[serde(default, deserialize_with = "lenient")]
    pub status: TaskStatus,
    #[serde(default, alias = "dayKey")]
    pub day_key: String,
    #[serde(default, deserialize_with = "lenient")]
    pub recurrence: Recurrence,
    #[serde(default, alias = "recurrenceParentId")]
    pub recurrence_parent_id: Option<String>,
    #[serde(default, deserialize_with = "json_array")]
    pub subtasks: Vec<Subtask>,
    #[serde(default, alias = "linkedNoteIds", deserialize_with = "json_array")]
    pub linked_note_ids: Vec<String>,
    #[serde(default, alias = "timeSpent")]
    pub time_spent: i64,
    #[serde(default, alias = "isTimerRunning", deserialize_with = "truthy")]
    pub is_timer_running: bool,
    #[serde(default, alias = "lastTimerStart")]
    pub last_timer_start: Option<i64>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(default, alias = "deletedAt")]
    pub deleted_at: Option<String>,
}

impl TaskRow {
    pub fn into_task(self) -> Task {
        let time_label = build_time_label(&self.time_start, &self.time_end);
        Task {
            id: self.id,
            title: self.title,
            time_label,
            time_start: self.time_start,
            time_end: self.time_end,
            status: self.status,
            day_key: self.day_key,
            recurrence: self.recurrence,
            recurrence_parent_id: self.recurrence_parent_id.filter(|s| !s.is_empty()),
            subtasks: self.subtasks,
            linked_note_ids: self.linked_note_ids,
            time_spent: self.time_spent,
            is_timer_running: self.is_timer_running,
            last_timer_start: self.last_timer_start,
            updated_at: ts_or_now(&self.updated_at),
            deleted_at: opt_ts(&self.deleted_at),
        }
    }
}

/// A note row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(default, alias = "deletedAt")]
    pub deleted_at: Option<String>,
}

impl NoteRow {
    pub fn into_note(self) -> Note {
        let updated_at = ts_or_now(&self.updated_at);
        Note {
            id: self.id,
            title: self.title,
            body: self.body,
            color: self.color.filter(|s| !s.is_empty()),
            created_at: opt_ts(&self.created_at).unwrap_or(updated_at),
            updated_at,
            deleted_at: opt_ts(&self.deleted_at),
        }
    }
}

/// A link row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkRow {
    #[serde(default, alias = "taskId")]
    pub task_id: String,
    #[serde(default, alias = "noteId")]
    pub note_id: String,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(default, alias = "deletedAt")]
    pub deleted_at: Option<String>,
}

impl LinkRow {
    pub fn into_remote_link(self) -> RemoteLinkRow {
        RemoteLinkRow {
            link: NoteTaskLink {
                task_id: self.task_id,
                note_id: self.note_id,
            },
            updated_at: ts_or_now(&self.updated_at),
            deleted_at: opt_ts(&self.deleted_at),
        }
    }
}

/// An inbox row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboxRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(default, alias = "deletedAt")]
    pub deleted_at: Option<String>,
}

impl InboxRow {
    pub fn into_inbox_item(self) -> InboxItem {
        let created_at = ts_or_now(&self.created_at);
        InboxItem {
            id: self.id,
            text: self.text,
            created_at,
            updated_at: opt_ts(&self.updated_at).unwrap_or(created_at),
            deleted_at: opt_ts(&self.deleted_at),
        }
    }
}

/// A plan row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default, deserialize_with = "lenient")]
    pub status: PlanStatus,
    #[serde(default, alias = "startDate")]
    pub start_date: String,
    #[serde(default, alias = "endDate")]
    pub end_date: String,
    #[serde(default, deserialize_with = "json_array")]
    pub goals: Vec<PlanGoal>,
    #[serde(default, deserialize_with = "json_array")]
    pub blocks: Vec<PlanBlock>,
    #[serde(default, deserialize_with = "json_array")]
    pub phases: Vec<PlanPhase>,
    #[serde(default, deserialize_with = "json_array")]
    pub decisions: Vec<PlanDecision>,
    #[serde(default, alias = "linkedTaskIds", deserialize_with = "json_array")]
    pub linked_task_ids: Vec<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(default, alias = "deletedAt")]
    pub deleted_at: Option<String>,
}

impl PlanRow {
    pub fn into_plan(self) -> Plan {
        let updated_at = ts_or_now(&self.updated_at);
        Plan {
            id: self.id,
            title: self.title,
            subtitle: self.subtitle,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            goals: self.goals,
            blocks: self.blocks,
            phases: self.phases,
            decisions: self.decisions,
            linked_task_ids: self.linked_task_ids,
            created_at: opt_ts(&self.created_at).unwrap_or(updated_at),
            updated_at,
            deleted_at: opt_ts(&self.deleted_at),
        }
    }
}

/// A settings row. The remote names the key column `meta_key`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaRow {
    #[serde(default, rename = "meta_key", alias = "key")]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(default, alias = "deletedAt")]
    pub deleted_at: Option<String>,
}

impl MetaRow {
    pub fn into_remote_meta(self) -> RemoteMetaRow {
        RemoteMetaRow {
            key: self.key,
            value: self.value,
            updated_at: ts_or_now(&self.updated_at),
            deleted: opt_ts(&self.deleted_at).is_some(),
        }
    }
}
