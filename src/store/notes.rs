//! Note persistence and mutation surface.

use chrono::Utc;
use libsql::Connection;

use crate::error::DatabaseError;
use crate::model::note::Note;
use crate::model::op::OpKind;
use crate::store::LocalStore;
use crate::store::db::{db_err, fmt_opt_ts, fmt_ts, parse_datetime};
use crate::store::outbox::enqueue_op;
use crate::store::tasks::put_task;

const NOTE_COLUMNS: &str = "id, title, body, color, created_at, updated_at, deleted_at";

fn row_to_note(row: &libsql::Row) -> Result<Note, DatabaseError> {
    let created_text: String = row.get(4).map_err(db_err)?;
    let updated_text: String = row.get(5).map_err(db_err)?;
    let deleted_text: Option<String> = row.get::<String>(6).ok();
    Ok(Note {
        id: row.get(0).map_err(db_err)?,
        title: row.get(1).map_err(db_err)?,
        body: row.get(2).map_err(db_err)?,
        color: row.get::<String>(3).ok(),
        created_at: parse_datetime(&created_text),
        updated_at: parse_datetime(&updated_text),
        deleted_at: deleted_text.as_deref().map(parse_datetime),
    })
}

/// Write a full note row (insert or whole-row replace).
pub(crate) async fn put_note(conn: &Connection, note: &Note) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO notes (id, title, body, color, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        libsql::params![
            note.id.as_str(),
            note.title.as_str(),
            note.body.as_str(),
            note.color.as_deref(),
            fmt_ts(note.created_at),
            fmt_ts(note.updated_at),
            fmt_opt_ts(note.deleted_at)
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Partial update for a note. `None` fields are left unchanged.
#[derive(Debug, Default, Clone)]
pub struct NotePatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub color: Option<String>,
}

impl LocalStore {
    /// Create a note.
    pub async fn create_note(
        &self,
        title: &str,
        body: &str,
        color: Option<String>,
    ) -> Result<Note, DatabaseError> {
        let mut note = Note::new(title, body);
        note.color = color;
        self.persist_note(&note, OpKind::Create).await?;
        Ok(note)
    }

    /// Fetch a live note.
    pub async fn get_note(&self, id: &str) -> Result<Option<Note>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1 AND deleted_at IS NULL"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_note(&row)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_note_any(&self, id: &str) -> Result<Option<Note>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_note(&row)?)),
            None => Ok(None),
        }
    }

    /// All live notes, most recently updated first.
    pub async fn list_notes(&self) -> Result<Vec<Note>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes WHERE deleted_at IS NULL \
                     ORDER BY updated_at DESC"
                ),
                (),
            )
            .await
            .map_err(db_err)?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            notes.push(row_to_note(&row)?);
        }
        Ok(notes)
    }

    /// Apply a partial update.
    pub async fn update_note(
        &self,
        id: &str,
        patch: NotePatch,
    ) -> Result<Option<Note>, DatabaseError> {
        let Some(mut note) = self.get_note(id).await? else {
            return Ok(None);
        };
        if let Some(title) = patch.title {
            note.title = title;
        }
        if let Some(body) = patch.body {
            note.body = body;
        }
        if let Some(color) = patch.color {
            note.color = Some(color);
        }
        note.updated_at = Utc::now();
        self.persist_note(&note, OpKind::Update).await?;
        Ok(Some(note))
    }

    /// Soft-delete a note, its links, and its back-references.
    ///
    /// Tasks that carried the note in `linked_note_ids` are rewritten
    /// without it, each producing its own update op so every device
    /// converges on the same cleaned-up state.
    pub async fn delete_note(&self, id: &str) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let now_text = fmt_ts(now);
        let affected: Vec<_> = self
            .list_tasks()
            .await?
            .into_iter()
            .filter(|task| task.linked_note_ids.iter().any(|n| n == id))
            .collect();

        let tx = self.conn().transaction().await.map_err(db_err)?;

        let mut link_keys = Vec::new();
        {
            let mut rows = tx
                .query(
                    "SELECT task_id, note_id FROM links WHERE note_id = ?1 AND deleted_at IS NULL",
                    libsql::params![id],
                )
                .await
                .map_err(db_err)?;
            while let Some(row) = rows.next().await.map_err(db_err)? {
                let task_id: String = row.get(0).map_err(db_err)?;
                let note_id: String = row.get(1).map_err(db_err)?;
                link_keys.push(format!("{task_id}:{note_id}"));
            }
        }

        tx.execute(
            "UPDATE notes SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            libsql::params![now_text.as_str(), id],
        )
        .await
        .map_err(db_err)?;
        tx.execute(
            "UPDATE links SET deleted_at = ?1, updated_at = ?1 WHERE note_id = ?2 AND deleted_at IS NULL",
            libsql::params![now_text.as_str(), id],
        )
        .await
        .map_err(db_err)?;

        let marker = serde_json::json!({ "updatedAt": now_text });
        enqueue_op(&tx, "note", id, OpKind::Delete, &marker).await?;
        for key in &link_keys {
            enqueue_op(&tx, "link", key, OpKind::Delete, &marker).await?;
        }
        for task in &affected {
            let mut task = task.clone();
            task.linked_note_ids.retain(|n| n != id);
            task.updated_at = now;
            put_task(&tx, &task).await?;
            let payload = serde_json::to_value(&task)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            enqueue_op(&tx, "task", &task.id, OpKind::Update, &payload).await?;
        }

        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(())
    }

    pub(crate) async fn persist_note(&self, note: &Note, op: OpKind) -> Result<(), DatabaseError> {
        let payload = serde_json::to_value(note)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let tx = self.conn().transaction().await.map_err(db_err)?;
        put_note(&tx, note).await?;
        enqueue_op(&tx, "note", &note.id, op, &payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::op::OpKind;
    use crate::store::tasks::TaskPatch;

    #[tokio::test]
    async fn create_and_update_note() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let note = store
            .create_note("Weekly summary", "Key points.", Some("amber".into()))
            .await
            .unwrap();

        let updated = store
            .update_note(
                &note.id,
                NotePatch {
                    body: Some("Revised points.".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Weekly summary");
        assert_eq!(updated.body, "Revised points.");
        assert_eq!(updated.color.as_deref(), Some("amber"));

        let ops = store.pending_ops().await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].op_type, OpKind::Update);
        assert_eq!(ops[1].payload["body"], "Revised points.");
    }

    #[tokio::test]
    async fn delete_note_cascades_links_and_task_backrefs() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();
        let note = store.create_note("n", "b", None).await.unwrap();
        store.link_note_to_task(&note.id, &task.id).await.unwrap();

        // Clear the setup ops so only the cascade remains.
        let setup: Vec<_> = store
            .pending_ops()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.op_id)
            .collect();
        store.remove_ops(&setup).await.unwrap();

        store.delete_note(&note.id).await.unwrap();

        assert!(store.get_note(&note.id).await.unwrap().is_none());
        assert!(store.list_links().await.unwrap().is_empty());
        let task = store.get_task(&task.id).await.unwrap().unwrap();
        assert!(task.linked_note_ids.is_empty());

        let ops = store.pending_ops().await.unwrap();
        let kinds: Vec<_> = ops
            .iter()
            .map(|o| (o.entity_type.as_str(), o.op_type))
            .collect();
        assert!(kinds.contains(&("note", OpKind::Delete)));
        assert!(kinds.contains(&("link", OpKind::Delete)));
        assert!(kinds.contains(&("task", OpKind::Update)));
    }

    #[tokio::test]
    async fn listings_do_not_mix_tables() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.create_note("a", "1", None).await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();
        store
            .update_task(
                &task.id,
                TaskPatch {
                    title: Some("t".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.list_notes().await.unwrap().len(), 1);
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
    }
}
