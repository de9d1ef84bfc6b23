//! Outbox — the durable ops queue bridging local writes to the remote.

use libsql::Connection;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::op::{OpKind, OpStatus, OpsQueueItem, is_syncable_entity_type};
use crate::store::LocalStore;
use crate::store::db::{db_err, fmt_ts, parse_datetime};

pub(crate) fn op_kind_str(kind: OpKind) -> &'static str {
    match kind {
        OpKind::Create => "create",
        OpKind::Update => "update",
        OpKind::Delete => "delete",
    }
}

fn parse_op_kind(s: &str) -> OpKind {
    match s {
        "create" => OpKind::Create,
        "delete" => OpKind::Delete,
        _ => OpKind::Update,
    }
}

/// Append an op to the queue, inside the caller's transaction.
///
/// Silently a no-op for entity types outside the syncable set. Returns
/// whether an entry was written so the caller knows to fire the
/// outbox-changed signal after commit.
pub(crate) async fn enqueue_op(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    op_type: OpKind,
    payload: &serde_json::Value,
) -> Result<bool, DatabaseError> {
    if !is_syncable_entity_type(entity_type) {
        return Ok(false);
    }
    let payload_text =
        serde_json::to_string(payload).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO ops_queue (op_id, entity_type, entity_id, op_type, payload, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
        libsql::params![
            Uuid::new_v4().to_string(),
            entity_type,
            entity_id,
            op_kind_str(op_type),
            payload_text,
            fmt_ts(chrono::Utc::now())
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(true)
}

fn row_to_op(row: &libsql::Row) -> Result<OpsQueueItem, DatabaseError> {
    let payload_text: String = row.get(4).map_err(db_err)?;
    let status_text: String = row.get(5).map_err(db_err)?;
    let created_text: String = row.get(6).map_err(db_err)?;
    Ok(OpsQueueItem {
        op_id: row.get(0).map_err(db_err)?,
        entity_type: row.get(1).map_err(db_err)?,
        entity_id: row.get(2).map_err(db_err)?,
        op_type: parse_op_kind(&row.get::<String>(3).map_err(db_err)?),
        payload: serde_json::from_str(&payload_text)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        status: if status_text == "acked" {
            OpStatus::Acked
        } else {
            OpStatus::Pending
        },
        created_at: parse_datetime(&created_text),
    })
}

const OP_COLUMNS: &str = "op_id, entity_type, entity_id, op_type, payload, status, created_at";

impl LocalStore {
    /// All pending ops in append order.
    pub async fn pending_ops(&self) -> Result<Vec<OpsQueueItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {OP_COLUMNS} FROM ops_queue WHERE status = 'pending' ORDER BY rowid"
                ),
                (),
            )
            .await
            .map_err(db_err)?;
        let mut ops = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            ops.push(row_to_op(&row)?);
        }
        Ok(ops)
    }

    /// Number of pending ops.
    pub async fn pending_op_count(&self) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM ops_queue WHERE status = 'pending'",
                (),
            )
            .await
            .map_err(db_err)?;
        let row = rows
            .next()
            .await
            .map_err(db_err)?
            .ok_or_else(|| DatabaseError::Query("missing count row".into()))?;
        row.get(0).map_err(db_err)
    }

    /// Remove ops by id — used for acked ops after a successful push and
    /// for dropping unsupported entity types without transmission.
    pub async fn remove_ops(&self, op_ids: &[String]) -> Result<usize, DatabaseError> {
        if op_ids.is_empty() {
            return Ok(0);
        }
        let tx = self.conn().transaction().await.map_err(db_err)?;
        let mut removed = 0usize;
        for op_id in op_ids {
            removed += tx
                .execute(
                    "DELETE FROM ops_queue WHERE op_id = ?1",
                    libsql::params![op_id.as_str()],
                )
                .await
                .map_err(db_err)? as usize;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    /// Enqueue an op outside any entity write — used by the plan bootstrap
    /// backfill. Fires the outbox signal when an entry was written.
    pub async fn enqueue_standalone(
        &self,
        entity_type: &str,
        entity_id: &str,
        op_type: OpKind,
        payload: &serde_json::Value,
    ) -> Result<bool, DatabaseError> {
        let enqueued = enqueue_op(self.conn(), entity_type, entity_id, op_type, payload).await?;
        if enqueued {
            self.notify_outbox();
        }
        Ok(enqueued)
    }
}
