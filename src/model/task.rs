//! Task data model — tasks, subtasks, and recurrence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shown when a task has no scheduled time window.
pub const NO_TIME_LABEL: &str = "Sem horário";

/// Current lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Planned,
    Active,
    Overdue,
    Done,
}

/// How a task repeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

/// Status of a single subtask.
///
/// Older clients serialized these uppercase; the aliases keep their
/// payloads readable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskStatus {
    #[default]
    #[serde(alias = "PENDING")]
    Pending,
    #[serde(alias = "DONE")]
    Done,
}

/// An ordered checklist entry inside a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: SubtaskStatus,
}

/// A single task on a calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Opaque, globally unique id.
    pub id: String,
    pub title: String,
    /// Derived display label, rebuilt whenever the time window changes.
    pub time_label: String,
    /// `HH:MM` or empty.
    pub time_start: String,
    /// `HH:MM` or empty.
    pub time_end: String,
    pub status: TaskStatus,
    /// Calendar date key, `YYYY-MM-DD`.
    pub day_key: String,
    pub recurrence: Recurrence,
    /// Back-reference from a materialized instance to its template.
    #[serde(default)]
    pub recurrence_parent_id: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub linked_note_ids: Vec<String>,
    /// Accumulated focus time in milliseconds.
    #[serde(default)]
    pub time_spent: i64,
    #[serde(default)]
    pub is_timer_running: bool,
    /// Epoch milliseconds of the last timer start, if running.
    #[serde(default)]
    pub last_timer_start: Option<i64>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Build the display label for a time window.
pub fn build_time_label(start: &str, end: &str) -> String {
    if !start.is_empty() && !end.is_empty() {
        format!("{start} - {end}")
    } else if !start.is_empty() {
        start.to_string()
    } else {
        NO_TIME_LABEL.to_string()
    }
}

impl Task {
    /// Create an empty task on the given day.
    pub fn new(day_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: String::new(),
            time_label: NO_TIME_LABEL.to_string(),
            time_start: String::new(),
            time_end: String::new(),
            status: TaskStatus::Planned,
            day_key: day_key.into(),
            recurrence: Recurrence::None,
            recurrence_parent_id: None,
            subtasks: Vec::new(),
            linked_note_ids: Vec::new(),
            time_spent: 0,
            is_timer_running: false,
            last_timer_start: None,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Builder: set title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Builder: set the time window and rebuild the label.
    pub fn with_time_window(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.time_start = start.into();
        self.time_end = end.into();
        self.time_label = build_time_label(&self.time_start, &self.time_end);
        self
    }

    /// Builder: set recurrence.
    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    /// A template is a recurring task that was never materialized itself.
    /// Templates are never displayed directly as instances.
    pub fn is_template(&self) -> bool {
        self.recurrence != Recurrence::None && self.recurrence_parent_id.is_none()
    }

    /// Materialize this template into a concrete same-shaped task for one
    /// day: fresh id, recurrence cleared, parent back-reference set, timers
    /// reset, subtasks cloned.
    pub fn materialized_instance(&self, day_key: &str, now: DateTime<Utc>) -> Task {
        Task {
            id: Uuid::new_v4().to_string(),
            day_key: day_key.to_string(),
            recurrence: Recurrence::None,
            recurrence_parent_id: Some(self.id.clone()),
            status: TaskStatus::Planned,
            time_spent: 0,
            is_timer_running: false,
            last_timer_start: None,
            subtasks: self.subtasks.clone(),
            linked_note_ids: self.linked_note_ids.clone(),
            updated_at: now,
            deleted_at: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_defaults() {
        let task = Task::new("2024-01-10");
        assert_eq!(task.status, TaskStatus::Planned);
        assert_eq!(task.recurrence, Recurrence::None);
        assert_eq!(task.time_label, NO_TIME_LABEL);
        assert!(task.subtasks.is_empty());
        assert!(!task.is_timer_running);
        assert!(task.deleted_at.is_none());
    }

    #[test]
    fn time_label_variants() {
        assert_eq!(build_time_label("09:00", "09:30"), "09:00 - 09:30");
        assert_eq!(build_time_label("09:00", ""), "09:00");
        assert_eq!(build_time_label("", ""), NO_TIME_LABEL);
    }

    #[test]
    fn template_detection() {
        let template = Task::new("2024-01-10").with_recurrence(Recurrence::Daily);
        assert!(template.is_template());

        let plain = Task::new("2024-01-10");
        assert!(!plain.is_template());

        let instance = template.materialized_instance("2024-01-11", Utc::now());
        assert!(!instance.is_template());
    }

    #[test]
    fn materialized_instance_resets_state() {
        let mut template = Task::new("2024-01-10")
            .with_title("Morning review")
            .with_time_window("09:00", "09:30")
            .with_recurrence(Recurrence::Daily);
        template.time_spent = 5000;
        template.is_timer_running = true;
        template.last_timer_start = Some(123);
        template.subtasks.push(Subtask {
            id: "s1".into(),
            title: "Check priorities".into(),
            status: SubtaskStatus::Done,
        });

        let instance = template.materialized_instance("2024-01-12", Utc::now());
        assert_ne!(instance.id, template.id);
        assert_eq!(instance.day_key, "2024-01-12");
        assert_eq!(instance.recurrence, Recurrence::None);
        assert_eq!(instance.recurrence_parent_id.as_deref(), Some(template.id.as_str()));
        assert_eq!(instance.status, TaskStatus::Planned);
        assert_eq!(instance.time_spent, 0);
        assert!(!instance.is_timer_running);
        assert!(instance.last_timer_start.is_none());
        assert_eq!(instance.title, "Morning review");
        assert_eq!(instance.time_start, "09:00");
        assert_eq!(instance.subtasks.len(), 1);
    }

    #[test]
    fn subtask_status_accepts_legacy_uppercase() {
        let parsed: SubtaskStatus = serde_json::from_str("\"DONE\"").unwrap();
        assert_eq!(parsed, SubtaskStatus::Done);
        let parsed: SubtaskStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(parsed, SubtaskStatus::Pending);
        assert_eq!(serde_json::to_string(&SubtaskStatus::Done).unwrap(), "\"done\"");
    }

    #[test]
    fn task_serde_camel_case() {
        let task = Task::new("2024-01-10").with_time_window("10:00", "11:00");
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"dayKey\":\"2024-01-10\""));
        assert!(json.contains("\"timeStart\":\"10:00\""));
        assert!(json.contains("\"isTimerRunning\":false"));
        assert!(!json.contains("\"deletedAt\""));

        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.day_key, "2024-01-10");
        assert_eq!(parsed.time_end, "11:00");
    }
}
