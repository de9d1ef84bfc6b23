//! Merge pulled remote rows into the local store.
//!
//! Every row goes through the same last-writer-wins comparison the remote
//! uses when applying pushed ops, so re-applying a pull (or receiving rows
//! out of order) converges to the same state. Each table is applied under
//! one transaction for atomic visibility to the rest of the app.

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::model::inbox::InboxItem;
use crate::model::link::NoteTaskLink;
use crate::model::note::Note;
use crate::model::plan::Plan;
use crate::model::task::Task;
use crate::model::meta::is_synced_meta_key;
use crate::policy::should_apply;
use crate::store::LocalStore;
use crate::store::db::{db_err, fmt_opt_ts, fmt_ts, parse_datetime};
use crate::store::inbox::put_inbox_item;
use crate::store::links::put_link;
use crate::store::notes::put_note;
use crate::store::plans::put_plan;
use crate::store::tasks::put_task;

/// A pulled link row. The pair is the identity; the timestamps drive the
/// merge.
#[derive(Debug, Clone)]
pub struct RemoteLinkRow {
    pub link: NoteTaskLink,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A pulled settings row.
#[derive(Debug, Clone)]
pub struct RemoteMetaRow {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl LocalStore {
    /// Merge pulled task rows.
    pub async fn apply_remote_tasks(&self, rows: Vec<Task>) -> Result<(), DatabaseError> {
        let mut accepted = Vec::new();
        for task in rows {
            let current = self.load_task_any(&task.id).await?.map(|t| t.updated_at);
            if should_apply(current, task.updated_at) {
                accepted.push(task);
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }
        let tx = self.conn().transaction().await.map_err(db_err)?;
        for task in &accepted {
            put_task(&tx, task).await?;
        }
        tx.commit().await.map_err(db_err)
    }

    /// Merge pulled note rows.
    pub async fn apply_remote_notes(&self, rows: Vec<Note>) -> Result<(), DatabaseError> {
        let mut accepted = Vec::new();
        for note in rows {
            let current = self.load_note_any(&note.id).await?.map(|n| n.updated_at);
            if should_apply(current, note.updated_at) {
                accepted.push(note);
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }
        let tx = self.conn().transaction().await.map_err(db_err)?;
        for note in &accepted {
            put_note(&tx, note).await?;
        }
        tx.commit().await.map_err(db_err)
    }

    /// Merge pulled link rows.
    pub async fn apply_remote_links(&self, rows: Vec<RemoteLinkRow>) -> Result<(), DatabaseError> {
        let mut accepted = Vec::new();
        for row in rows {
            let current = self.load_link_updated_at(&row.link).await?;
            if should_apply(current, row.updated_at) {
                accepted.push(row);
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }
        let tx = self.conn().transaction().await.map_err(db_err)?;
        for row in &accepted {
            put_link(
                &tx,
                &row.link,
                &fmt_ts(row.updated_at),
                fmt_opt_ts(row.deleted_at).as_deref(),
            )
            .await?;
        }
        tx.commit().await.map_err(db_err)
    }

    /// Merge pulled plan rows.
    pub async fn apply_remote_plans(&self, rows: Vec<Plan>) -> Result<(), DatabaseError> {
        let mut accepted = Vec::new();
        for plan in rows {
            let current = self.load_plan_any(&plan.id).await?.map(|p| p.updated_at);
            if should_apply(current, plan.updated_at) {
                accepted.push(plan);
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }
        let tx = self.conn().transaction().await.map_err(db_err)?;
        for plan in &accepted {
            put_plan(&tx, plan).await?;
        }
        tx.commit().await.map_err(db_err)
    }

    /// Merge pulled inbox rows.
    pub async fn apply_remote_inbox_items(
        &self,
        rows: Vec<InboxItem>,
    ) -> Result<(), DatabaseError> {
        let mut accepted = Vec::new();
        for item in rows {
            let current = self
                .load_inbox_item_any(&item.id)
                .await?
                .map(|i| i.updated_at);
            if should_apply(current, item.updated_at) {
                accepted.push(item);
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }
        let tx = self.conn().transaction().await.map_err(db_err)?;
        for item in &accepted {
            put_inbox_item(&tx, item).await?;
        }
        tx.commit().await.map_err(db_err)
    }

    /// Merge pulled settings rows. Only the synced key subset is accepted;
    /// identity and cursor keys are never overwritten from remote.
    pub async fn apply_remote_meta(&self, rows: Vec<RemoteMetaRow>) -> Result<(), DatabaseError> {
        for row in rows {
            if row.key.is_empty() || !is_synced_meta_key(&row.key) {
                continue;
            }
            let current = self.get_meta_updated_at(&row.key).await?;
            if !should_apply(current, row.updated_at) {
                continue;
            }
            if row.deleted {
                self.conn()
                    .execute(
                        "DELETE FROM meta WHERE key = ?1",
                        libsql::params![row.key.as_str()],
                    )
                    .await
                    .map_err(db_err)?;
            } else {
                self.set_meta_with_ts(&row.key, &row.value, row.updated_at)
                    .await?;
            }
        }
        Ok(())
    }

    async fn load_link_updated_at(
        &self,
        link: &NoteTaskLink,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT updated_at FROM links WHERE task_id = ?1 AND note_id = ?2",
                libsql::params![link.task_id.as_str(), link.note_id.as_str()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(parse_datetime(&row.get::<String>(0).map_err(db_err)?))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn remote_task(id: &str, title: &str, updated_at: DateTime<Utc>) -> Task {
        let mut task = Task::new("2024-01-10").with_title(title);
        task.id = id.to_string();
        task.updated_at = updated_at;
        task
    }

    #[tokio::test]
    async fn idempotent_apply() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let row = remote_task("t1", "Buy milk", ts(100));

        store.apply_remote_tasks(vec![row.clone()]).await.unwrap();
        let first = store.get_task("t1").await.unwrap().unwrap();

        store.apply_remote_tasks(vec![row]).await.unwrap();
        let second = store.get_task("t1").await.unwrap().unwrap();

        assert_eq!(first.title, second.title);
        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_writer_wins_in_either_order() {
        let older = remote_task("t1", "Old title", ts(100));
        let newer = remote_task("t1", "New title", ts(200));

        let store = LocalStore::open_in_memory().await.unwrap();
        store.apply_remote_tasks(vec![older.clone()]).await.unwrap();
        store.apply_remote_tasks(vec![newer.clone()]).await.unwrap();
        assert_eq!(store.get_task("t1").await.unwrap().unwrap().title, "New title");

        let store = LocalStore::open_in_memory().await.unwrap();
        store.apply_remote_tasks(vec![newer]).await.unwrap();
        store.apply_remote_tasks(vec![older]).await.unwrap();
        assert_eq!(store.get_task("t1").await.unwrap().unwrap().title, "New title");
    }

    #[tokio::test]
    async fn delete_wins_over_older_update() {
        let update = remote_task("t1", "Updated", ts(100));
        let mut tombstone = remote_task("t1", "Updated", ts(200));
        tombstone.deleted_at = Some(ts(200));
        tombstone.updated_at = ts(200);

        // Update then delete.
        let store = LocalStore::open_in_memory().await.unwrap();
        store.apply_remote_tasks(vec![update.clone()]).await.unwrap();
        store.apply_remote_tasks(vec![tombstone.clone()]).await.unwrap();
        assert!(store.get_task("t1").await.unwrap().is_none());

        // Delete then update — the older update must not resurrect it.
        let store = LocalStore::open_in_memory().await.unwrap();
        store.apply_remote_tasks(vec![tombstone]).await.unwrap();
        store.apply_remote_tasks(vec![update]).await.unwrap();
        assert!(store.get_task("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn newer_update_undeletes() {
        let mut tombstone = remote_task("t1", "", ts(100));
        tombstone.deleted_at = Some(ts(100));
        let revived = remote_task("t1", "Back again", ts(200));

        let store = LocalStore::open_in_memory().await.unwrap();
        store.apply_remote_tasks(vec![tombstone]).await.unwrap();
        store.apply_remote_tasks(vec![revived]).await.unwrap();

        let task = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.title, "Back again");
        assert!(task.deleted_at.is_none());
    }

    #[tokio::test]
    async fn meta_merge_respects_synced_key_set() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let cursor_before = store
            .get_meta(crate::model::meta::keys::LAST_SYNC_CURSOR)
            .await
            .unwrap();

        store
            .apply_remote_meta(vec![
                RemoteMetaRow {
                    key: "wakeTime".into(),
                    value: "05:45".into(),
                    updated_at: ts(100),
                    deleted: false,
                },
                RemoteMetaRow {
                    key: "lastSyncCursor".into(),
                    value: "2030-01-01T00:00:00.000Z".into(),
                    updated_at: ts(100),
                    deleted: false,
                },
            ])
            .await
            .unwrap();

        assert_eq!(
            store.get_meta("wakeTime").await.unwrap().as_deref(),
            Some("05:45")
        );
        // Cursor key is device-local and must be untouched.
        assert_eq!(
            store
                .get_meta(crate::model::meta::keys::LAST_SYNC_CURSOR)
                .await
                .unwrap(),
            cursor_before
        );
    }

    #[tokio::test]
    async fn stale_meta_is_ignored() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .apply_remote_meta(vec![RemoteMetaRow {
                key: "sleepTime".into(),
                value: "23:30".into(),
                updated_at: ts(200),
                deleted: false,
            }])
            .await
            .unwrap();
        store
            .apply_remote_meta(vec![RemoteMetaRow {
                key: "sleepTime".into(),
                value: "21:00".into(),
                updated_at: ts(100),
                deleted: false,
            }])
            .await
            .unwrap();
        assert_eq!(
            store.get_meta("sleepTime").await.unwrap().as_deref(),
            Some("23:30")
        );
    }
}
