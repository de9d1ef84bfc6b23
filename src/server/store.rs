//! Remote authority backing store.
//!
//! The durable cross-device ledger: per-user rows with soft-delete
//! tombstones. Op application is idempotent and commutative — every
//! upsert and soft-delete first runs the last-writer-wins comparison
//! against the stored row, so replays and out-of-order arrival converge.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase};
use serde_json::json;
use tracing::info;

use crate::error::DatabaseError;
use crate::model::op::OpKind;
use crate::policy::should_apply;
use crate::store::{db_err, fmt_ts, parse_datetime};
use crate::sync::normalize::{InboxRow, LinkRow, MetaRow, NoteRow, PlanRow, TaskRow};
use crate::sync::protocol::PushOp;

/// Everything a pull returns.
#[derive(Debug, serde::Serialize)]
pub struct PullPayload {
    pub tasks: Vec<serde_json::Value>,
    pub notes: Vec<serde_json::Value>,
    pub links: Vec<serde_json::Value>,
    pub plans: Vec<serde_json::Value>,
    pub inbox_items: Vec<serde_json::Value>,
    pub meta: Vec<serde_json::Value>,
    #[serde(rename = "newCursor")]
    pub new_cursor: String,
}

/// The remote store. Handlers are request-scoped and stateless aside from
/// this.
pub struct RemoteStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

static SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        time_start TEXT NOT NULL DEFAULT '',
        time_end TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'planned',
        day_key TEXT NOT NULL DEFAULT '',
        recurrence TEXT NOT NULL DEFAULT 'none',
        recurrence_parent_id TEXT,
        subtasks TEXT NOT NULL DEFAULT '[]',
        linked_note_ids TEXT NOT NULL DEFAULT '[]',
        time_spent INTEGER NOT NULL DEFAULT 0,
        is_timer_running INTEGER NOT NULL DEFAULT 0,
        last_timer_start INTEGER,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);
    CREATE INDEX IF NOT EXISTS idx_tasks_user_updated ON tasks(user_id, updated_at);

    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        body TEXT NOT NULL DEFAULT '',
        color TEXT,
        created_at TEXT,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id);
    CREATE INDEX IF NOT EXISTS idx_notes_user_updated ON notes(user_id, updated_at);

    CREATE TABLE IF NOT EXISTS links (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        task_id TEXT NOT NULL,
        note_id TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_links_user ON links(user_id);

    CREATE TABLE IF NOT EXISTS plans (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        subtitle TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'active',
        start_date TEXT NOT NULL DEFAULT '',
        end_date TEXT NOT NULL DEFAULT '',
        goals TEXT NOT NULL DEFAULT '[]',
        blocks TEXT NOT NULL DEFAULT '[]',
        phases TEXT NOT NULL DEFAULT '[]',
        decisions TEXT NOT NULL DEFAULT '[]',
        linked_task_ids TEXT NOT NULL DEFAULT '[]',
        created_at TEXT,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_plans_user ON plans(user_id);

    CREATE TABLE IF NOT EXISTS inbox_items (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        text TEXT NOT NULL DEFAULT '',
        created_at TEXT,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_inbox_user ON inbox_items(user_id);

    CREATE TABLE IF NOT EXISTS meta (
        user_id TEXT NOT NULL,
        meta_key TEXT NOT NULL,
        value TEXT NOT NULL DEFAULT '',
        updated_at TEXT NOT NULL,
        deleted_at TEXT,
        PRIMARY KEY (user_id, meta_key)
    );
"#;

impl RemoteStore {
    /// Open (or create) the ledger database.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open remote database: {e}")))?;
        let store = Self::from_db(db)?;
        store.init_schema().await?;
        info!(path = %path.display(), "Remote store opened");
        Ok(store)
    }

    /// Create an in-memory ledger (for tests).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;
        let store = Self::from_db(db)?;
        store.init_schema().await?;
        Ok(store)
    }

    fn from_db(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map(|_| ())
            .map_err(|e| DatabaseError::Migration(format!("Schema creation failed: {e}")))
    }

    /// Make sure the user row exists.
    pub async fn ensure_user(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
                libsql::params![user_id, fmt_ts(Utc::now())],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Apply a batch of pushed ops; returns the op ids durably evaluated.
    ///
    /// Acking means "received and evaluated", not "caused a change" — a
    /// stale op is still acked so the client's outbox does not retry a
    /// legitimately lost write forever. Unknown entity types are skipped
    /// and left un-acked.
    pub async fn apply_ops(
        &self,
        user_id: &str,
        ops: &[PushOp],
    ) -> Result<Vec<String>, DatabaseError> {
        let mut acked = Vec::new();
        for op in ops {
            if op.op_id.is_empty() {
                continue;
            }
            let ts = op_timestamp(&op.payload);
            let applied: bool = match op.entity_type.as_str() {
                "task" => {
                    if op.op_type == OpKind::Delete {
                        self.mark_deleted("tasks", &op.entity_id, ts).await?
                    } else {
                        self.upsert_task(user_id, &op.payload, ts).await?
                    }
                }
                "note" => {
                    if op.op_type == OpKind::Delete {
                        self.mark_deleted("notes", &op.entity_id, ts).await?
                    } else {
                        self.upsert_note(user_id, &op.payload, ts).await?
                    }
                }
                "link" => {
                    if op.op_type == OpKind::Delete {
                        self.mark_deleted("links", &op.entity_id, ts).await?
                    } else {
                        self.upsert_link(user_id, &op.payload, ts).await?
                    }
                }
                "plan" => {
                    if op.op_type == OpKind::Delete {
                        self.mark_deleted("plans", &op.entity_id, ts).await?
                    } else {
                        self.upsert_plan(user_id, &op.payload, ts).await?
                    }
                }
                "inbox" => {
                    if op.op_type == OpKind::Delete {
                        self.mark_deleted("inbox_items", &op.entity_id, ts).await?
                    } else {
                        self.upsert_inbox_item(user_id, &op.payload, ts).await?
                    }
                }
                "meta" => {
                    if op.op_type == OpKind::Delete {
                        self.mark_meta_deleted(user_id, &op.entity_id, ts).await?
                    } else {
                        self.upsert_meta(user_id, &op.payload, ts).await?
                    }
                }
                _ => continue,
            };
            if !applied {
                tracing::trace!(op_id = %op.op_id, "Op evaluated without effect");
            }
            acked.push(op.op_id.clone());
        }
        Ok(acked)
    }

    /// Whether an incoming timestamp beats the stored row for `id`.
    async fn row_is_stale(
        &self,
        table: &str,
        id: &str,
        incoming: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT updated_at FROM {table} WHERE id = ?1"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        let current = match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<String>(0).ok().as_deref().map(parse_datetime),
            None => None,
        };
        Ok(!should_apply(current, incoming))
    }

    /// Soft-delete a row if the delete is not stale.
    async fn mark_deleted(
        &self,
        table: &str,
        id: &str,
        ts: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        if self.row_is_stale(table, id, ts).await? {
            return Ok(false);
        }
        let ts_text = fmt_ts(ts);
        self.conn
            .execute(
                &format!("UPDATE {table} SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2"),
                libsql::params![ts_text.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn upsert_task(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        ts: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let Ok(row) = serde_json::from_value::<TaskRow>(payload.clone()) else {
            return Ok(false);
        };
        if row.id.is_empty() {
            return Ok(false);
        }
        if self.row_is_stale("tasks", &row.id, ts).await? {
            return Ok(false);
        }
        let subtasks = serde_json::to_string(&row.subtasks)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let linked = serde_json::to_string(&row.linked_note_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let status = serde_json::to_value(row.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "planned".into());
        let recurrence = serde_json::to_value(row.recurrence)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "none".into());
        self.conn
            .execute(
                "INSERT INTO tasks (id, user_id, title, time_start, time_end, status, day_key, \
                 recurrence, recurrence_parent_id, subtasks, linked_note_ids, time_spent, \
                 is_timer_running, last_timer_start, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     time_start = excluded.time_start,
                     time_end = excluded.time_end,
                     status = excluded.status,
                     day_key = excluded.day_key,
                     recurrence = excluded.recurrence,
                     recurrence_parent_id = excluded.recurrence_parent_id,
                     subtasks = excluded.subtasks,
                     linked_note_ids = excluded.linked_note_ids,
                     time_spent = excluded.time_spent,
                     is_timer_running = excluded.is_timer_running,
                     last_timer_start = excluded.last_timer_start,
                     updated_at = excluded.updated_at,
                     deleted_at = NULL",
                libsql::params![
                    row.id.as_str(),
                    user_id,
                    row.title.as_str(),
                    row.time_start.as_str(),
                    row.time_end.as_str(),
                    status.as_str(),
                    row.day_key.as_str(),
                    recurrence.as_str(),
                    row.recurrence_parent_id.as_deref(),
                    subtasks.as_str(),
                    linked.as_str(),
                    row.time_spent,
                    row.is_timer_running as i64,
                    row.last_timer_start,
                    fmt_ts(ts)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn upsert_note(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        ts: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let Ok(row) = serde_json::from_value::<NoteRow>(payload.clone()) else {
            return Ok(false);
        };
        if row.id.is_empty() {
            return Ok(false);
        }
        if self.row_is_stale("notes", &row.id, ts).await? {
            return Ok(false);
        }
        self.conn
            .execute(
                "INSERT INTO notes (id, user_id, title, body, color, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     body = excluded.body,
                     color = excluded.color,
                     updated_at = excluded.updated_at,
                     deleted_at = NULL",
                libsql::params![
                    row.id.as_str(),
                    user_id,
                    row.title.as_str(),
                    row.body.as_str(),
                    row.color.as_deref(),
                    row.created_at.as_deref(),
                    fmt_ts(ts)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn upsert_link(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        ts: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let Ok(row) = serde_json::from_value::<LinkRow>(payload.clone()) else {
            return Ok(false);
        };
        if row.task_id.is_empty() || row.note_id.is_empty() {
            return Ok(false);
        }
        let id = format!("{}:{}", row.task_id, row.note_id);
        if self.row_is_stale("links", &id, ts).await? {
            return Ok(false);
        }
        self.conn
            .execute(
                "INSERT INTO links (id, user_id, task_id, note_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     task_id = excluded.task_id,
                     note_id = excluded.note_id,
                     updated_at = excluded.updated_at,
                     deleted_at = NULL",
                libsql::params![
                    id.as_str(),
                    user_id,
                    row.task_id.as_str(),
                    row.note_id.as_str(),
                    fmt_ts(ts)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn upsert_plan(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        ts: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let Ok(row) = serde_json::from_value::<PlanRow>(payload.clone()) else {
            return Ok(false);
        };
        if row.id.is_empty() {
            return Ok(false);
        }
        if self.row_is_stale("plans", &row.id, ts).await? {
            return Ok(false);
        }
        let status = serde_json::to_value(row.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "active".into());
        let goals = serde_json::to_string(&row.goals)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let blocks = serde_json::to_string(&row.blocks)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let phases = serde_json::to_string(&row.phases)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let decisions = serde_json::to_string(&row.decisions)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let linked = serde_json::to_string(&row.linked_task_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO plans (id, user_id, title, subtitle, status, start_date, end_date, \
                 goals, blocks, phases, decisions, linked_task_ids, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     subtitle = excluded.subtitle,
                     status = excluded.status,
                     start_date = excluded.start_date,
                     end_date = excluded.end_date,
                     goals = excluded.goals,
                     blocks = excluded.blocks,
                     phases = excluded.phases,
                     decisions = excluded.decisions,
                     linked_task_ids = excluded.linked_task_ids,
                     updated_at = excluded.updated_at,
                     deleted_at = NULL",
                libsql::params![
                    row.id.as_str(),
                    user_id,
                    row.title.as_str(),
                    row.subtitle.as_str(),
                    status.as_str(),
                    row.start_date.as_str(),
                    row.end_date.as_str(),
                    goals.as_str(),
                    blocks.as_str(),
                    phases.as_str(),
                    decisions.as_str(),
                    linked.as_str(),
                    row.created_at.as_deref(),
                    fmt_ts(ts)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn upsert_inbox_item(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        ts: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let Ok(row) = serde_json::from_value::<InboxRow>(payload.clone()) else {
            return Ok(false);
        };
        if row.id.is_empty() {
            return Ok(false);
        }
        if self.row_is_stale("inbox_items", &row.id, ts).await? {
            return Ok(false);
        }
        self.conn
            .execute(
                "INSERT INTO inbox_items (id, user_id, text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     text = excluded.text,
                     updated_at = excluded.updated_at,
                     deleted_at = NULL",
                libsql::params![
                    row.id.as_str(),
                    user_id,
                    row.text.as_str(),
                    row.created_at.as_deref(),
                    fmt_ts(ts)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn meta_is_stale(
        &self,
        user_id: &str,
        key: &str,
        incoming: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT updated_at FROM meta WHERE user_id = ?1 AND meta_key = ?2",
                libsql::params![user_id, key],
            )
            .await
            .map_err(db_err)?;
        let current = match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<String>(0).ok().as_deref().map(parse_datetime),
            None => None,
        };
        Ok(!should_apply(current, incoming))
    }

    async fn upsert_meta(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        ts: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let Ok(row) = serde_json::from_value::<MetaRow>(payload.clone()) else {
            return Ok(false);
        };
        if row.key.is_empty() {
            return Ok(false);
        }
        if self.meta_is_stale(user_id, &row.key, ts).await? {
            return Ok(false);
        }
        self.conn
            .execute(
                "INSERT INTO meta (user_id, meta_key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, meta_key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at,
                     deleted_at = NULL",
                libsql::params![user_id, row.key.as_str(), row.value.as_str(), fmt_ts(ts)],
            )
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn mark_meta_deleted(
        &self,
        user_id: &str,
        key: &str,
        ts: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        if self.meta_is_stale(user_id, key, ts).await? {
            return Ok(false);
        }
        let ts_text = fmt_ts(ts);
        self.conn
            .execute(
                "UPDATE meta SET deleted_at = ?1, updated_at = ?1 \
                 WHERE user_id = ?2 AND meta_key = ?3",
                libsql::params![ts_text.as_str(), user_id, key],
            )
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    /// Delta query: every row for this user touched since the cursor,
    /// across every owned table. The `deleted_at > cursor` arm is what
    /// makes tombstones visible to devices that saw the row before it was
    /// deleted.
    pub async fn pull_rows(
        &self,
        user_id: &str,
        cursor: DateTime<Utc>,
    ) -> Result<PullPayload, DatabaseError> {
        let cursor_text = fmt_ts(cursor);

        let tasks = self
            .select_rows(
                "SELECT id, user_id, title, time_start, time_end, status, day_key, recurrence, \
                 recurrence_parent_id, subtasks, linked_note_ids, time_spent, is_timer_running, \
                 last_timer_start, updated_at, deleted_at FROM tasks \
                 WHERE user_id = ?1 AND (updated_at > ?2 OR deleted_at > ?2)",
                user_id,
                &cursor_text,
                task_row_json,
            )
            .await?;
        let notes = self
            .select_rows(
                "SELECT id, user_id, title, body, color, created_at, updated_at, deleted_at \
                 FROM notes WHERE user_id = ?1 AND (updated_at > ?2 OR deleted_at > ?2)",
                user_id,
                &cursor_text,
                note_row_json,
            )
            .await?;
        let links = self
            .select_rows(
                "SELECT id, user_id, task_id, note_id, updated_at, deleted_at \
                 FROM links WHERE user_id = ?1 AND (updated_at > ?2 OR deleted_at > ?2)",
                user_id,
                &cursor_text,
                link_row_json,
            )
            .await?;
        let plans = self
            .select_rows(
                "SELECT id, user_id, title, subtitle, status, start_date, end_date, goals, \
                 blocks, phases, decisions, linked_task_ids, created_at, updated_at, deleted_at \
                 FROM plans WHERE user_id = ?1 AND (updated_at > ?2 OR deleted_at > ?2)",
                user_id,
                &cursor_text,
                plan_row_json,
            )
            .await?;
        let inbox_items = self
            .select_rows(
                "SELECT id, user_id, text, created_at, updated_at, deleted_at \
                 FROM inbox_items WHERE user_id = ?1 AND (updated_at > ?2 OR deleted_at > ?2)",
                user_id,
                &cursor_text,
                inbox_row_json,
            )
            .await?;
        let meta = self
            .select_rows(
                "SELECT user_id, meta_key, value, updated_at, deleted_at \
                 FROM meta WHERE user_id = ?1 AND (updated_at > ?2 OR deleted_at > ?2)",
                user_id,
                &cursor_text,
                meta_row_json,
            )
            .await?;

        Ok(PullPayload {
            tasks,
            notes,
            links,
            plans,
            inbox_items,
            meta,
            new_cursor: fmt_ts(Utc::now()),
        })
    }

    async fn select_rows(
        &self,
        sql: &str,
        user_id: &str,
        cursor_text: &str,
        map: fn(&libsql::Row) -> Result<serde_json::Value, DatabaseError>,
    ) -> Result<Vec<serde_json::Value>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, libsql::params![user_id, cursor_text])
            .await
            .map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            out.push(map(&row)?);
        }
        Ok(out)
    }
}

/// Authoritative timestamp of an op: its payload's `updatedAt` (either
/// naming), falling back to server time.
fn op_timestamp(payload: &serde_json::Value) -> DateTime<Utc> {
    payload
        .get("updatedAt")
        .or_else(|| payload.get("updated_at"))
        .and_then(|v| v.as_str())
        .map(parse_datetime)
        .unwrap_or_else(Utc::now)
}

fn json_column(row: &libsql::Row, idx: i32) -> serde_json::Value {
    row.get::<String>(idx)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| json!([]))
}

fn task_row_json(row: &libsql::Row) -> Result<serde_json::Value, DatabaseError> {
    Ok(json!({
        "id": row.get::<String>(0).map_err(db_err)?,
        "user_id": row.get::<String>(1).map_err(db_err)?,
        "title": row.get::<String>(2).map_err(db_err)?,
        "time_start": row.get::<String>(3).map_err(db_err)?,
        "time_end": row.get::<String>(4).map_err(db_err)?,
        "status": row.get::<String>(5).map_err(db_err)?,
        "day_key": row.get::<String>(6).map_err(db_err)?,
        "recurrence": row.get::<String>(7).map_err(db_err)?,
        "recurrence_parent_id": row.get::<String>(8).ok(),
        "subtasks": json_column(row, 9),
        "linked_note_ids": json_column(row, 10),
        "time_spent": row.get::<i64>(11).map_err(db_err)?,
        "is_timer_running": row.get::<i64>(12).map_err(db_err)? != 0,
        "last_timer_start": row.get::<i64>(13).ok(),
        "updated_at": row.get::<String>(14).map_err(db_err)?,
        "deleted_at": row.get::<String>(15).ok(),
    }))
}

fn note_row_json(row: &libsql::Row) -> Result<serde_json::Value, DatabaseError> {
    Ok(json!({
        "id": row.get::<String>(0).map_err(db_err)?,
        "user_id": row.get::<String>(1).map_err(db_err)?,
        "title": row.get::<String>(2).map_err(db_err)?,
        "body": row.get::<String>(3).map_err(db_err)?,
        "color": row.get::<String>(4).ok(),
        "created_at": row.get::<String>(5).ok(),
        "updated_at": row.get::<String>(6).map_err(db_err)?,
        "deleted_at": row.get::<String>(7).ok(),
    }))
}

fn link_row_json(row: &libsql::Row) -> Result<serde_json::Value, DatabaseError> {
    Ok(json!({
        "id": row.get::<String>(0).map_err(db_err)?,
        "user_id": row.get::<String>(1).map_err(db_err)?,
        "task_id": row.get::<String>(2).map_err(db_err)?,
        "note_id": row.get::<String>(3).map_err(db_err)?,
        "updated_at": row.get::<String>(4).map_err(db_err)?,
        "deleted_at": row.get::<String>(5).ok(),
    }))
}

fn plan_row_json(row: &libsql::Row) -> Result<serde_json::Value, DatabaseError> {
    Ok(json!({
        "id": row.get::<String>(0).map_err(db_err)?,
        "user_id": row.get::<String>(1).map_err(db_err)?,
        "title": row.get::<String>(2).map_err(db_err)?,
        "subtitle": row.get::<String>(3).map_err(db_err)?,
        "status": row.get::<String>(4).map_err(db_err)?,
        "start_date": row.get::<String>(5).map_err(db_err)?,
        "end_date": row.get::<String>(6).map_err(db_err)?,
        "goals": json_column(row, 7),
        "blocks": json_column(row, 8),
        "phases": json_column(row, 9),
        "decisions": json_column(row, 10),
        "linked_task_ids": json_column(row, 11),
        "created_at": row.get::<String>(12).ok(),
        "updated_at": row.get::<String>(13).map_err(db_err)?,
        "deleted_at": row.get::<String>(14).ok(),
    }))
}

fn inbox_row_json(row: &libsql::Row) -> Result<serde_json::Value, DatabaseError> {
    Ok(json!({
        "id": row.get::<String>(0).map_err(db_err)?,
        "user_id": row.get::<String>(1).map_err(db_err)?,
        "text": row.get::<String>(2).map_err(db_err)?,
        "created_at": row.get::<String>(3).ok(),
        "updated_at": row.get::<String>(4).map_err(db_err)?,
        "deleted_at": row.get::<String>(5).ok(),
    }))
}

fn meta_row_json(row: &libsql::Row) -> Result<serde_json::Value, DatabaseError> {
    Ok(json!({
        "user_id": row.get::<String>(0).map_err(db_err)?,
        "meta_key": row.get::<String>(1).map_err(db_err)?,
        "value": row.get::<String>(2).map_err(db_err)?,
        "updated_at": row.get::<String>(3).map_err(db_err)?,
        "deleted_at": row.get::<String>(4).ok(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn push_op(
        op_id: &str,
        entity_type: &str,
        entity_id: &str,
        op_type: OpKind,
        payload: serde_json::Value,
    ) -> PushOp {
        PushOp {
            op_id: op_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            op_type,
            payload,
        }
    }

    fn task_payload(id: &str, title: &str, at: DateTime<Utc>) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "dayKey": "2024-01-10",
            "status": "planned",
            "updatedAt": fmt_ts(at),
        })
    }

    #[tokio::test]
    async fn push_upserts_and_acks() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();

        let acked = store
            .apply_ops(
                "u1",
                &[push_op(
                    "op-1",
                    "task",
                    "t1",
                    OpKind::Create,
                    task_payload("t1", "Buy milk", ts(100)),
                )],
            )
            .await
            .unwrap();
        assert_eq!(acked, vec!["op-1"]);

        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_eq!(payload.tasks.len(), 1);
        assert_eq!(payload.tasks[0]["title"], "Buy milk");
        assert_eq!(payload.tasks[0]["deleted_at"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn stale_write_is_acked_but_ignored() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();

        store
            .apply_ops(
                "u1",
                &[push_op(
                    "op-new",
                    "note",
                    "n1",
                    OpKind::Update,
                    json!({"id": "n1", "title": "Alpha", "updatedAt": fmt_ts(ts(100))}),
                )],
            )
            .await
            .unwrap();

        // An older concurrent edit arrives late.
        let acked = store
            .apply_ops(
                "u1",
                &[push_op(
                    "op-old",
                    "note",
                    "n1",
                    OpKind::Update,
                    json!({"id": "n1", "title": "Beta", "updatedAt": fmt_ts(ts(90))}),
                )],
            )
            .await
            .unwrap();
        assert_eq!(acked, vec!["op-old"]);

        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_eq!(payload.notes[0]["title"], "Alpha");
    }

    #[tokio::test]
    async fn delete_wins_over_older_update_any_order() {
        // Delete after update.
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();
        store
            .apply_ops(
                "u1",
                &[
                    push_op("op-1", "task", "t1", OpKind::Create, task_payload("t1", "x", ts(100))),
                    push_op("op-2", "task", "t1", OpKind::Delete, json!({"updatedAt": fmt_ts(ts(200))})),
                ],
            )
            .await
            .unwrap();
        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_ne!(payload.tasks[0]["deleted_at"], serde_json::Value::Null);

        // Update arriving after a newer delete must not resurrect.
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();
        store
            .apply_ops(
                "u1",
                &[
                    push_op("op-1", "task", "t1", OpKind::Create, task_payload("t1", "x", ts(50))),
                    push_op("op-2", "task", "t1", OpKind::Delete, json!({"updatedAt": fmt_ts(ts(200))})),
                    push_op("op-3", "task", "t1", OpKind::Update, task_payload("t1", "late", ts(100))),
                ],
            )
            .await
            .unwrap();
        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_ne!(payload.tasks[0]["deleted_at"], serde_json::Value::Null);
        assert_eq!(payload.tasks[0]["title"], "x");

        // A newer update over an older delete un-deletes.
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();
        store
            .apply_ops(
                "u1",
                &[
                    push_op("op-1", "task", "t1", OpKind::Create, task_payload("t1", "x", ts(50))),
                    push_op("op-2", "task", "t1", OpKind::Delete, json!({"updatedAt": fmt_ts(ts(100))})),
                    push_op("op-3", "task", "t1", OpKind::Update, task_payload("t1", "revived", ts(200))),
                ],
            )
            .await
            .unwrap();
        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_eq!(payload.tasks[0]["deleted_at"], serde_json::Value::Null);
        assert_eq!(payload.tasks[0]["title"], "revived");
    }

    #[tokio::test]
    async fn unknown_entity_types_are_not_acked() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();
        let acked = store
            .apply_ops(
                "u1",
                &[
                    push_op("op-1", "widget", "w1", OpKind::Create, json!({"id": "w1"})),
                    push_op("op-2", "task", "t1", OpKind::Create, task_payload("t1", "x", ts(100))),
                ],
            )
            .await
            .unwrap();
        assert_eq!(acked, vec!["op-2"]);
    }

    #[tokio::test]
    async fn pull_filters_by_user_and_cursor() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();
        store.ensure_user("u2").await.unwrap();
        store
            .apply_ops(
                "u1",
                &[push_op("op-1", "task", "t1", OpKind::Create, task_payload("t1", "mine", ts(100)))],
            )
            .await
            .unwrap();
        store
            .apply_ops(
                "u2",
                &[push_op("op-2", "task", "t2", OpKind::Create, task_payload("t2", "theirs", ts(100)))],
            )
            .await
            .unwrap();

        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_eq!(payload.tasks.len(), 1);
        assert_eq!(payload.tasks[0]["id"], "t1");

        // Cursor past the write returns nothing and stays monotonic.
        let cursor = parse_datetime(&payload.new_cursor);
        let later = store.pull_rows("u1", cursor).await.unwrap();
        assert!(later.tasks.is_empty());
        assert!(parse_datetime(&later.new_cursor) >= cursor);
    }

    #[tokio::test]
    async fn meta_ops_roundtrip() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();
        store
            .apply_ops(
                "u1",
                &[push_op(
                    "op-1",
                    "meta",
                    "wakeTime",
                    OpKind::Update,
                    json!({"key": "wakeTime", "value": "06:00", "updatedAt": fmt_ts(ts(100))}),
                )],
            )
            .await
            .unwrap();
        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_eq!(payload.meta.len(), 1);
        assert_eq!(payload.meta[0]["meta_key"], "wakeTime");
        assert_eq!(payload.meta[0]["value"], "06:00");
    }

    #[tokio::test]
    async fn link_composite_key() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        store.ensure_user("u1").await.unwrap();
        store
            .apply_ops(
                "u1",
                &[push_op(
                    "op-1",
                    "link",
                    "t1:n1",
                    OpKind::Create,
                    json!({"taskId": "t1", "noteId": "n1", "updatedAt": fmt_ts(ts(100))}),
                )],
            )
            .await
            .unwrap();
        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_eq!(payload.links[0]["id"], "t1:n1");

        store
            .apply_ops(
                "u1",
                &[push_op("op-2", "link", "t1:n1", OpKind::Delete, json!({"updatedAt": fmt_ts(ts(200))}))],
            )
            .await
            .unwrap();
        let payload = store.pull_rows("u1", ts(0)).await.unwrap();
        assert_ne!(payload.links[0]["deleted_at"], serde_json::Value::Null);
    }
}
