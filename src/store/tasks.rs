//! Task persistence and mutation surface.
//!
//! Every mutation writes the task row and its outbox op in one transaction.
//! Recurring templates are never mutated directly: interacting with a
//! template for a given day first materializes a concrete instance and the
//! mutation lands on the instance.

use chrono::{Timelike, Utc};
use libsql::Connection;

use crate::error::DatabaseError;
use crate::model::op::OpKind;
use crate::model::task::{Recurrence, Subtask, SubtaskStatus, Task, TaskStatus, build_time_label};
use crate::store::LocalStore;
use crate::store::db::{db_err, fmt_opt_ts, fmt_ts, json_text, json_vec, parse_datetime, today_key};
use crate::store::outbox::enqueue_op;

const TASK_COLUMNS: &str = "id, title, time_label, time_start, time_end, status, day_key, \
     recurrence, recurrence_parent_id, subtasks, linked_note_ids, time_spent, \
     is_timer_running, last_timer_start, updated_at, deleted_at";

fn status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Planned => "planned",
        TaskStatus::Active => "active",
        TaskStatus::Overdue => "overdue",
        TaskStatus::Done => "done",
    }
}

fn str_to_status(s: &str) -> TaskStatus {
    match s {
        "active" => TaskStatus::Active,
        "overdue" => TaskStatus::Overdue,
        "done" => TaskStatus::Done,
        _ => TaskStatus::Planned,
    }
}

fn recurrence_to_str(recurrence: Recurrence) -> &'static str {
    match recurrence {
        Recurrence::None => "none",
        Recurrence::Daily => "daily",
        Recurrence::Weekly => "weekly",
        Recurrence::Monthly => "monthly",
    }
}

fn str_to_recurrence(s: &str) -> Recurrence {
    match s {
        "daily" => Recurrence::Daily,
        "weekly" => Recurrence::Weekly,
        "monthly" => Recurrence::Monthly,
        _ => Recurrence::None,
    }
}

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let subtasks_text: String = row.get(9).map_err(db_err)?;
    let linked_text: String = row.get(10).map_err(db_err)?;
    let updated_text: String = row.get(14).map_err(db_err)?;
    let deleted_text: Option<String> = row.get::<String>(15).ok();
    Ok(Task {
        id: row.get(0).map_err(db_err)?,
        title: row.get(1).map_err(db_err)?,
        time_label: row.get(2).map_err(db_err)?,
        time_start: row.get(3).map_err(db_err)?,
        time_end: row.get(4).map_err(db_err)?,
        status: str_to_status(&row.get::<String>(5).map_err(db_err)?),
        day_key: row.get(6).map_err(db_err)?,
        recurrence: str_to_recurrence(&row.get::<String>(7).map_err(db_err)?),
        recurrence_parent_id: row.get::<String>(8).ok(),
        subtasks: json_vec(&subtasks_text),
        linked_note_ids: json_vec(&linked_text),
        time_spent: row.get(11).map_err(db_err)?,
        is_timer_running: row.get::<i64>(12).map_err(db_err)? != 0,
        last_timer_start: row.get::<i64>(13).ok(),
        updated_at: parse_datetime(&updated_text),
        deleted_at: deleted_text.as_deref().map(parse_datetime),
    })
}

/// Write a full task row (insert or whole-row replace).
pub(crate) async fn put_task(conn: &Connection, task: &Task) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO tasks (id, title, time_label, time_start, time_end, status, \
         day_key, recurrence, recurrence_parent_id, subtasks, linked_note_ids, time_spent, \
         is_timer_running, last_timer_start, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        libsql::params![
            task.id.as_str(),
            task.title.as_str(),
            task.time_label.as_str(),
            task.time_start.as_str(),
            task.time_end.as_str(),
            status_to_str(task.status),
            task.day_key.as_str(),
            recurrence_to_str(task.recurrence),
            task.recurrence_parent_id.as_deref(),
            json_text(&task.subtasks)?,
            json_text(&task.linked_note_ids)?,
            task.time_spent,
            task.is_timer_running as i64,
            task.last_timer_start,
            fmt_ts(task.updated_at),
            fmt_opt_ts(task.deleted_at)
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Partial update for a task. `None` fields are left unchanged.
#[derive(Debug, Default, Clone)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub day_key: Option<String>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub status: Option<TaskStatus>,
    pub recurrence: Option<Recurrence>,
    pub subtasks: Option<Vec<Subtask>>,
    pub linked_note_ids: Option<Vec<String>>,
}

/// Parse `HH:MM` into minutes since midnight.
fn parse_time_to_minutes(s: &str) -> Option<i64> {
    let (h, m) = s.split_once(':')?;
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * 60 + m)
}

/// Whether a (day, start-time) combination is still ahead of the clock.
fn is_future_time(day_key: &str, start: &str) -> bool {
    let today = today_key();
    if day_key > today.as_str() {
        return true;
    }
    if day_key < today.as_str() {
        return false;
    }
    let Some(start_minutes) = parse_time_to_minutes(start) else {
        return false;
    };
    let now = chrono::Local::now();
    let now_minutes = i64::from(now.hour()) * 60 + i64::from(now.minute());
    start_minutes > now_minutes
}

impl LocalStore {
    /// Create an empty task on the given day.
    pub async fn create_task(&self, day_key: &str) -> Result<Task, DatabaseError> {
        let task = Task::new(day_key);
        self.persist_task(&task, OpKind::Create).await?;
        Ok(task)
    }

    /// Fetch a live (non-deleted) task.
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND deleted_at IS NULL"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    /// Fetch a task row including tombstones — used by conflict resolution.
    pub(crate) async fn load_task_any(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    /// All live tasks.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE deleted_at IS NULL \
                 ORDER BY day_key, time_start"
            ),
            (),
        )
        .await
    }

    /// Live tasks for a calendar day.
    pub async fn tasks_for_day(&self, day_key: &str) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE day_key = ?1 AND deleted_at IS NULL \
                 ORDER BY time_start"
            ),
            libsql::params![day_key],
        )
        .await
    }

    /// Live tasks with a given status.
    pub async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 AND deleted_at IS NULL \
                 ORDER BY day_key, time_start"
            ),
            libsql::params![status_to_str(status)],
        )
        .await
    }

    async fn query_tasks(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self.conn().query(sql, params).await.map_err(db_err)?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    /// Apply a partial update.
    ///
    /// Rescheduling rebuilds the time label, and a task that was active or
    /// overdue falls back to planned when its new slot is still ahead of
    /// the clock.
    pub async fn update_task(
        &self,
        id: &str,
        patch: TaskPatch,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(current) = self.get_task(id).await? else {
            return Ok(None);
        };
        let rescheduled =
            patch.time_start.is_some() || patch.time_end.is_some() || patch.day_key.is_some();

        let mut next = current.clone();
        if let Some(title) = patch.title {
            next.title = title;
        }
        if let Some(day_key) = patch.day_key {
            next.day_key = day_key;
        }
        if let Some(start) = patch.time_start {
            next.time_start = start;
        }
        if let Some(end) = patch.time_end {
            next.time_end = end;
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(recurrence) = patch.recurrence {
            next.recurrence = recurrence;
        }
        if let Some(subtasks) = patch.subtasks {
            next.subtasks = subtasks;
        }
        if let Some(linked) = patch.linked_note_ids {
            next.linked_note_ids = linked;
        }
        next.updated_at = Utc::now();

        if rescheduled {
            next.time_label = build_time_label(&next.time_start, &next.time_end);
            if matches!(current.status, TaskStatus::Active | TaskStatus::Overdue) {
                if next.time_start.is_empty() || next.time_end.is_empty() {
                    if next.day_key.as_str() >= today_key().as_str() {
                        next.status = TaskStatus::Planned;
                    }
                } else if is_future_time(&next.day_key, &next.time_start) {
                    next.status = TaskStatus::Planned;
                }
            }
        }

        self.persist_task(&next, OpKind::Update).await?;
        Ok(Some(next))
    }

    /// Set one subtask's status. No-op when the subtask is unknown.
    pub async fn set_subtask_status(
        &self,
        task_id: &str,
        subtask_id: &str,
        status: SubtaskStatus,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(mut task) = self.get_task(task_id).await? else {
            return Ok(None);
        };
        let Some(subtask) = task.subtasks.iter_mut().find(|s| s.id == subtask_id) else {
            return Ok(Some(task));
        };
        if subtask.status == status {
            return Ok(Some(task));
        }
        subtask.status = status;
        task.updated_at = Utc::now();
        self.persist_task(&task, OpKind::Update).await?;
        Ok(Some(task))
    }

    /// Find the concrete instance of a recurring template for a day, or
    /// materialize one. Returns `None` when the id is unknown; a
    /// non-template task is returned as-is.
    pub async fn materialize_recurring(
        &self,
        id: &str,
        day_key: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(None);
        };
        if !task.is_template() {
            return Ok(Some(task));
        }
        let (instance, is_new) = self.resolve_instance(&task, day_key).await?;
        if is_new {
            self.persist_task(&instance, OpKind::Create).await?;
        }
        Ok(Some(instance))
    }

    /// Toggle a task between done and planned.
    ///
    /// Completing a task stops a running timer (folding elapsed time into
    /// `time_spent`) and completes every subtask. Un-completing reverts the
    /// status only. On a template this operates on the day's instance.
    pub async fn toggle_task_done(
        &self,
        id: &str,
        selected_day_key: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        let (base, is_new) = if task.is_template() {
            self.resolve_instance(&task, selected_day_key).await?
        } else {
            (task, false)
        };

        let was_done = base.status == TaskStatus::Done;
        let mut next = base;
        next.status = if was_done {
            TaskStatus::Planned
        } else {
            TaskStatus::Done
        };
        if !was_done {
            if next.is_timer_running {
                if let Some(started) = next.last_timer_start {
                    next.time_spent += (now.timestamp_millis() - started).max(0);
                }
            }
            next.is_timer_running = false;
            next.last_timer_start = None;
            for subtask in &mut next.subtasks {
                subtask.status = SubtaskStatus::Done;
            }
        }
        next.updated_at = now;

        let op = if is_new { OpKind::Create } else { OpKind::Update };
        self.persist_task(&next, op).await?;
        Ok(Some(next))
    }

    /// Start the focus timer. Already-running timers are left alone.
    pub async fn start_timer(
        &self,
        id: &str,
        selected_day_key: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        let (base, is_new) = if task.is_template() {
            self.resolve_instance(&task, selected_day_key).await?
        } else {
            (task, false)
        };
        if base.is_timer_running {
            return Ok(Some(base));
        }
        let mut next = base;
        next.is_timer_running = true;
        next.last_timer_start = Some(now.timestamp_millis());
        next.updated_at = now;

        let op = if is_new { OpKind::Create } else { OpKind::Update };
        self.persist_task(&next, op).await?;
        Ok(Some(next))
    }

    /// Stop the focus timer, folding the elapsed interval into `time_spent`.
    pub async fn stop_timer(
        &self,
        id: &str,
        selected_day_key: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(None);
        };
        let base = if task.is_template() {
            // A template with no materialized instance has no timer to stop.
            match self.find_instance(&task.id, selected_day_key).await? {
                Some(instance) => instance,
                None => return Ok(None),
            }
        } else {
            task
        };
        let (true, Some(started)) = (base.is_timer_running, base.last_timer_start) else {
            return Ok(Some(base));
        };
        let now = Utc::now();
        let mut next = base;
        next.time_spent += (now.timestamp_millis() - started).max(0);
        next.is_timer_running = false;
        next.last_timer_start = None;
        next.updated_at = now;
        self.persist_task(&next, OpKind::Update).await?;
        Ok(Some(next))
    }

    /// Soft-delete a task and every link that references it. Each cascaded
    /// link produces its own delete op so the remote tombstones them too.
    pub async fn delete_task(&self, id: &str) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let now_text = fmt_ts(now);
        let tx = self.conn().transaction().await.map_err(db_err)?;

        let mut link_keys = Vec::new();
        {
            let mut rows = tx
                .query(
                    "SELECT task_id, note_id FROM links WHERE task_id = ?1 AND deleted_at IS NULL",
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
            "UPDATE tasks SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            libsql::params![now_text.as_str(), id],
        )
        .await
        .map_err(db_err)?;
        tx.execute(
            "UPDATE links SET deleted_at = ?1, updated_at = ?1 WHERE task_id = ?2 AND deleted_at IS NULL",
            libsql::params![now_text.as_str(), id],
        )
        .await
        .map_err(db_err)?;

        let marker = serde_json::json!({ "updatedAt": now_text });
        enqueue_op(&tx, "task", id, OpKind::Delete, &marker).await?;
        for key in &link_keys {
            enqueue_op(&tx, "link", key, OpKind::Delete, &marker).await?;
        }

        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(())
    }

    async fn find_instance(
        &self,
        template_id: &str,
        day_key: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE recurrence_parent_id = ?1 AND day_key = ?2 AND deleted_at IS NULL \
                     LIMIT 1"
                ),
                libsql::params![template_id, day_key],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    /// Resolve the concrete task a template interaction targets: the day's
    /// existing instance, or a freshly built (not yet persisted) one.
    async fn resolve_instance(
        &self,
        template: &Task,
        day_key: &str,
    ) -> Result<(Task, bool), DatabaseError> {
        match self.find_instance(&template.id, day_key).await? {
            Some(instance) => Ok((instance, false)),
            None => Ok((template.materialized_instance(day_key, Utc::now()), true)),
        }
    }

    /// Write a task and its op in one transaction, then signal the outbox.
    pub(crate) async fn persist_task(
        &self,
        task: &Task,
        op: OpKind,
    ) -> Result<(), DatabaseError> {
        let payload = serde_json::to_value(task)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let tx = self.conn().transaction().await.map_err(db_err)?;
        put_task(&tx, task).await?;
        enqueue_op(&tx, "task", &task.id, op, &payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::op::OpKind;

    #[tokio::test]
    async fn create_task_enqueues_create_op() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();

        let ops = store.pending_ops().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].entity_type, "task");
        assert_eq!(ops[0].entity_id, task.id);
        assert_eq!(ops[0].op_type, OpKind::Create);
        // Full snapshot, not a partial payload.
        assert_eq!(ops[0].payload["dayKey"], "2024-01-10");
    }

    #[tokio::test]
    async fn update_task_rebuilds_time_label() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();

        let updated = store
            .update_task(
                &task.id,
                TaskPatch {
                    time_start: Some("09:00".into()),
                    time_end: Some("10:30".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.time_label, "09:00 - 10:30");
        assert!(updated.updated_at >= task.updated_at);
    }

    #[tokio::test]
    async fn toggle_done_completes_subtasks_and_stops_timer() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();
        store
            .update_task(
                &task.id,
                TaskPatch {
                    subtasks: Some(vec![
                        Subtask {
                            id: "s1".into(),
                            title: "one".into(),
                            status: SubtaskStatus::Pending,
                        },
                        Subtask {
                            id: "s2".into(),
                            title: "two".into(),
                            status: SubtaskStatus::Done,
                        },
                    ]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.start_timer(&task.id, "2024-01-10").await.unwrap();

        let done = store
            .toggle_task_done(&task.id, "2024-01-10")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert!(!done.is_timer_running);
        assert!(done.last_timer_start.is_none());
        assert!(done.subtasks.iter().all(|s| s.status == SubtaskStatus::Done));

        let undone = store
            .toggle_task_done(&task.id, "2024-01-10")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(undone.status, TaskStatus::Planned);
        // Subtasks keep their completed state when un-doing.
        assert!(undone.subtasks.iter().all(|s| s.status == SubtaskStatus::Done));
    }

    #[tokio::test]
    async fn template_interaction_materializes_instance() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();
        store
            .update_task(
                &task.id,
                TaskPatch {
                    title: Some("Daily review".into()),
                    recurrence: Some(Recurrence::Daily),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let instance = store
            .toggle_task_done(&task.id, "2024-01-12")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(instance.id, task.id);
        assert_eq!(instance.day_key, "2024-01-12");
        assert_eq!(instance.recurrence, Recurrence::None);
        assert_eq!(
            instance.recurrence_parent_id.as_deref(),
            Some(task.id.as_str())
        );
        assert_eq!(instance.status, TaskStatus::Done);

        // The template itself is untouched.
        let template = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(template.status, TaskStatus::Planned);
        assert_eq!(template.recurrence, Recurrence::Daily);

        // A second interaction for the same day reuses the instance.
        let again = store
            .toggle_task_done(&task.id, "2024-01-12")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, instance.id);
        assert_eq!(again.status, TaskStatus::Planned);
    }

    #[tokio::test]
    async fn stop_timer_accumulates_time_spent() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();

        let started = store
            .start_timer(&task.id, "2024-01-10")
            .await
            .unwrap()
            .unwrap();
        assert!(started.is_timer_running);
        assert!(started.last_timer_start.is_some());

        let stopped = store
            .stop_timer(&task.id, "2024-01-10")
            .await
            .unwrap()
            .unwrap();
        assert!(!stopped.is_timer_running);
        assert!(stopped.last_timer_start.is_none());
        assert!(stopped.time_spent >= 0);

        // Stopping again is a no-op.
        let again = store
            .stop_timer(&task.id, "2024-01-10")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.time_spent, stopped.time_spent);
    }

    #[tokio::test]
    async fn delete_task_tombstones_and_enqueues_marker() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();
        let ops = store.pending_ops().await.unwrap();
        store
            .remove_ops(&ops.iter().map(|o| o.op_id.clone()).collect::<Vec<_>>())
            .await
            .unwrap();

        store.delete_task(&task.id).await.unwrap();
        assert!(store.get_task(&task.id).await.unwrap().is_none());
        // Tombstone survives for conflict resolution.
        let tombstone = store.load_task_any(&task.id).await.unwrap().unwrap();
        assert!(tombstone.deleted_at.is_some());

        let ops = store.pending_ops().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op_type, OpKind::Delete);
        assert!(ops[0].payload["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn set_subtask_status_touches_only_known_subtasks() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();
        store
            .update_task(
                &task.id,
                TaskPatch {
                    subtasks: Some(vec![Subtask {
                        id: "s1".into(),
                        title: "one".into(),
                        status: SubtaskStatus::Pending,
                    }]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let before = store.pending_op_count().await.unwrap();

        let updated = store
            .set_subtask_status(&task.id, "s1", SubtaskStatus::Done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.subtasks[0].status, SubtaskStatus::Done);
        assert_eq!(store.pending_op_count().await.unwrap(), before + 1);

        // Unknown subtask id: no write, no op.
        store
            .set_subtask_status(&task.id, "missing", SubtaskStatus::Done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.pending_op_count().await.unwrap(), before + 1);
    }

    #[tokio::test]
    async fn materialize_recurring_is_find_or_create() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let task = store.create_task("2024-01-10").await.unwrap();
        store
            .update_task(
                &task.id,
                TaskPatch {
                    recurrence: Some(Recurrence::Weekly),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = store
            .materialize_recurring(&task.id, "2024-01-17")
            .await
            .unwrap()
            .unwrap();
        let second = store
            .materialize_recurring(&task.id, "2024-01-17")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);

        // Day and status queries see the instance, not the template, for
        // the materialized day.
        let day = store.tasks_for_day("2024-01-17").await.unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].id, first.id);
        let planned = store.tasks_with_status(TaskStatus::Planned).await.unwrap();
        assert_eq!(planned.len(), 2);
    }

    #[test]
    fn parse_time_to_minutes_bounds() {
        assert_eq!(parse_time_to_minutes("09:30"), Some(570));
        assert_eq!(parse_time_to_minutes("00:00"), Some(0));
        assert_eq!(parse_time_to_minutes("24:00"), None);
        assert_eq!(parse_time_to_minutes(""), None);
        assert_eq!(parse_time_to_minutes("junk"), None);
    }
}
