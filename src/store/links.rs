//! Task↔note links.

use chrono::Utc;
use libsql::Connection;

use crate::error::DatabaseError;
use crate::model::link::NoteTaskLink;
use crate::model::op::OpKind;
use crate::model::task::Task;
use crate::store::LocalStore;
use crate::store::db::{db_err, fmt_ts};
use crate::store::outbox::enqueue_op;
use crate::store::tasks::put_task;

/// Upsert a link row, clearing any tombstone.
pub(crate) async fn put_link(
    conn: &Connection,
    link: &NoteTaskLink,
    updated_at: &str,
    deleted_at: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO links (task_id, note_id, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(task_id, note_id) DO UPDATE SET
             updated_at = excluded.updated_at,
             deleted_at = excluded.deleted_at",
        libsql::params![
            link.task_id.as_str(),
            link.note_id.as_str(),
            updated_at,
            deleted_at
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

impl LocalStore {
    /// Link a note to a task.
    ///
    /// Idempotent on the pair; also mirrors the note id into the task's
    /// `linked_note_ids` so the task snapshot carries its references.
    /// Returns the updated task, or `None` when the task is unknown.
    pub async fn link_note_to_task(
        &self,
        note_id: &str,
        task_id: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(mut task) = self.get_task(task_id).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        let link = NoteTaskLink::new(task_id, note_id);

        if !task.linked_note_ids.iter().any(|n| n == note_id) {
            task.linked_note_ids.push(note_id.to_string());
        }
        task.updated_at = now;

        let link_payload = serde_json::to_value(&link)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let task_payload = serde_json::to_value(&task)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let tx = self.conn().transaction().await.map_err(db_err)?;
        put_link(&tx, &link, &fmt_ts(now), None).await?;
        put_task(&tx, &task).await?;
        enqueue_op(&tx, "link", &link.remote_key(), OpKind::Create, &link_payload).await?;
        enqueue_op(&tx, "task", &task.id, OpKind::Update, &task_payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(Some(task))
    }

    /// All live links.
    pub async fn list_links(&self) -> Result<Vec<NoteTaskLink>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT task_id, note_id FROM links WHERE deleted_at IS NULL ORDER BY rowid",
                (),
            )
            .await
            .map_err(db_err)?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            links.push(NoteTaskLink {
                task_id: row.get(0).map_err(db_err)?,
                note_id: row.get(1).map_err(db_err)?,
            });
        }
        Ok(links)
    }

    /// Live links for one task.
    pub async fn links_for_task(&self, task_id: &str) -> Result<Vec<NoteTaskLink>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT task_id, note_id FROM links \
                 WHERE task_id = ?1 AND deleted_at IS NULL ORDER BY rowid",
                libsql::params![task_id],
            )
            .await
            .map_err(db_err)?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            links.push(NoteTaskLink {
                task_id: row.get(0).map_err(db_err)?,
                note_id: row.get(1).map_err(db_err)?,
            });
        }
        Ok(links)
    }
}
