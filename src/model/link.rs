//! Task↔note link — a many-to-many join pair.

use serde::{Deserialize, Serialize};

/// A link between a task and a note. The pair itself is the identity;
/// the remote store keys it as `"{task_id}:{note_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteTaskLink {
    pub task_id: String,
    pub note_id: String,
}

impl NoteTaskLink {
    pub fn new(task_id: impl Into<String>, note_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            note_id: note_id.into(),
        }
    }

    /// Composite key used by the remote authority.
    pub fn remote_key(&self) -> String {
        format!("{}:{}", self.task_id, self.note_id)
    }
}
