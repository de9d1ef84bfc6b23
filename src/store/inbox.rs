//! Inbox capture and triage.

use chrono::Utc;
use libsql::Connection;

use crate::error::DatabaseError;
use crate::model::inbox::InboxItem;
use crate::model::note::Note;
use crate::model::op::OpKind;
use crate::model::task::Task;
use crate::store::LocalStore;
use crate::store::db::{db_err, fmt_opt_ts, fmt_ts, parse_datetime};
use crate::store::notes::put_note;
use crate::store::outbox::enqueue_op;
use crate::store::tasks::put_task;

const INBOX_COLUMNS: &str = "id, text, created_at, updated_at, deleted_at";

fn row_to_item(row: &libsql::Row) -> Result<InboxItem, DatabaseError> {
    let created_text: String = row.get(2).map_err(db_err)?;
    let updated_text: String = row.get(3).map_err(db_err)?;
    let deleted_text: Option<String> = row.get::<String>(4).ok();
    Ok(InboxItem {
        id: row.get(0).map_err(db_err)?,
        text: row.get(1).map_err(db_err)?,
        created_at: parse_datetime(&created_text),
        updated_at: parse_datetime(&updated_text),
        deleted_at: deleted_text.as_deref().map(parse_datetime),
    })
}

pub(crate) async fn put_inbox_item(
    conn: &Connection,
    item: &InboxItem,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO inbox_items (id, text, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        libsql::params![
            item.id.as_str(),
            item.text.as_str(),
            fmt_ts(item.created_at),
            fmt_ts(item.updated_at),
            fmt_opt_ts(item.deleted_at)
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

impl LocalStore {
    /// Capture a free-text item into the inbox.
    pub async fn add_inbox_item(&self, text: &str) -> Result<InboxItem, DatabaseError> {
        let item = InboxItem::new(text);
        let payload = serde_json::to_value(&item)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let tx = self.conn().transaction().await.map_err(db_err)?;
        put_inbox_item(&tx, &item).await?;
        enqueue_op(&tx, "inbox", &item.id, OpKind::Create, &payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(item)
    }

    /// Fetch a live inbox item.
    pub async fn get_inbox_item(&self, id: &str) -> Result<Option<InboxItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {INBOX_COLUMNS} FROM inbox_items WHERE id = ?1 AND deleted_at IS NULL"
                ),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_item(&row)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_inbox_item_any(
        &self,
        id: &str,
    ) -> Result<Option<InboxItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {INBOX_COLUMNS} FROM inbox_items WHERE id = ?1"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_item(&row)?)),
            None => Ok(None),
        }
    }

    /// All live inbox items, newest first.
    pub async fn list_inbox_items(&self) -> Result<Vec<InboxItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {INBOX_COLUMNS} FROM inbox_items WHERE deleted_at IS NULL \
                     ORDER BY created_at DESC"
                ),
                (),
            )
            .await
            .map_err(db_err)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            items.push(row_to_item(&row)?);
        }
        Ok(items)
    }

    /// Rewrite an item's text.
    pub async fn update_inbox_item(
        &self,
        id: &str,
        text: &str,
    ) -> Result<Option<InboxItem>, DatabaseError> {
        let Some(mut item) = self.get_inbox_item(id).await? else {
            return Ok(None);
        };
        item.text = text.to_string();
        item.updated_at = Utc::now();
        let payload = serde_json::to_value(&item)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let tx = self.conn().transaction().await.map_err(db_err)?;
        put_inbox_item(&tx, &item).await?;
        enqueue_op(&tx, "inbox", id, OpKind::Update, &payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(Some(item))
    }

    /// Soft-delete an inbox item.
    pub async fn delete_inbox_item(&self, id: &str) -> Result<(), DatabaseError> {
        let now_text = fmt_ts(Utc::now());
        let marker = serde_json::json!({ "updatedAt": now_text });
        let tx = self.conn().transaction().await.map_err(db_err)?;
        tx.execute(
            "UPDATE inbox_items SET deleted_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND deleted_at IS NULL",
            libsql::params![now_text.as_str(), id],
        )
        .await
        .map_err(db_err)?;
        enqueue_op(&tx, "inbox", id, OpKind::Delete, &marker).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(())
    }

    /// Triage an inbox item into a task on the given day. The capture text
    /// becomes the task title; the item is deleted and the task created in
    /// one transaction, producing one op each.
    pub async fn convert_inbox_to_task(
        &self,
        id: &str,
        day_key: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(item) = self.get_inbox_item(id).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        let now_text = fmt_ts(now);
        let task = Task::new(day_key).with_title(&item.text);
        let task_payload = serde_json::to_value(&task)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let marker = serde_json::json!({ "updatedAt": now_text });

        let tx = self.conn().transaction().await.map_err(db_err)?;
        tx.execute(
            "UPDATE inbox_items SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            libsql::params![now_text.as_str(), id],
        )
        .await
        .map_err(db_err)?;
        put_task(&tx, &task).await?;
        enqueue_op(&tx, "inbox", id, OpKind::Delete, &marker).await?;
        enqueue_op(&tx, "task", &task.id, OpKind::Create, &task_payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(Some(task))
    }

    /// Triage an inbox item into a note.
    pub async fn convert_inbox_to_note(
        &self,
        id: &str,
        title: &str,
        body: &str,
        color: Option<String>,
    ) -> Result<Option<Note>, DatabaseError> {
        let Some(_item) = self.get_inbox_item(id).await? else {
            return Ok(None);
        };
        let now_text = fmt_ts(Utc::now());
        let mut note = Note::new(title, body);
        note.color = color;
        let note_payload = serde_json::to_value(&note)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let marker = serde_json::json!({ "updatedAt": now_text });

        let tx = self.conn().transaction().await.map_err(db_err)?;
        tx.execute(
            "UPDATE inbox_items SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            libsql::params![now_text.as_str(), id],
        )
        .await
        .map_err(db_err)?;
        put_note(&tx, &note).await?;
        enqueue_op(&tx, "inbox", id, OpKind::Delete, &marker).await?;
        enqueue_op(&tx, "note", &note.id, OpKind::Create, &note_payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(Some(note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::op::OpKind;

    #[tokio::test]
    async fn capture_update_delete_lifecycle() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let item = store.add_inbox_item("call the dentist").await.unwrap();

        let updated = store
            .update_inbox_item(&item.id, "call the dentist tomorrow")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.text, "call the dentist tomorrow");

        store.delete_inbox_item(&item.id).await.unwrap();
        assert!(store.get_inbox_item(&item.id).await.unwrap().is_none());

        let ops = store.pending_ops().await.unwrap();
        let kinds: Vec<_> = ops.iter().map(|o| o.op_type).collect();
        assert_eq!(kinds, vec![OpKind::Create, OpKind::Update, OpKind::Delete]);
    }

    #[tokio::test]
    async fn convert_to_task_deletes_item_and_creates_task() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let item = store.add_inbox_item("buy milk").await.unwrap();

        let task = store
            .convert_inbox_to_task(&item.id, "2024-01-10")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.title, "buy milk");
        assert_eq!(task.day_key, "2024-01-10");
        assert!(store.get_inbox_item(&item.id).await.unwrap().is_none());

        let ops = store.pending_ops().await.unwrap();
        // capture create + inbox delete + task create
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[1].entity_type, "inbox");
        assert_eq!(ops[1].op_type, OpKind::Delete);
        assert_eq!(ops[2].entity_type, "task");
        assert_eq!(ops[2].op_type, OpKind::Create);
    }

    #[tokio::test]
    async fn convert_to_note_carries_color() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let item = store.add_inbox_item("meeting checklist").await.unwrap();

        let note = store
            .convert_inbox_to_note(&item.id, "Meeting", "checklist", Some("sky".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.color.as_deref(), Some("sky"));
        assert!(store.get_inbox_item(&item.id).await.unwrap().is_none());
        assert_eq!(store.list_notes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn convert_unknown_item_is_none() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let out = store.convert_inbox_to_task("missing", "2024-01-10").await.unwrap();
        assert!(out.is_none());
    }
}
