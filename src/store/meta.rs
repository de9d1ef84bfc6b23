//! Key/value metadata.

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::model::meta::{MetaItem, is_synced_meta_key, keys};
use crate::model::op::OpKind;
use crate::store::LocalStore;
use crate::store::db::{db_err, fmt_ts, parse_datetime};
use crate::store::outbox::enqueue_op;

impl LocalStore {
    /// Read a meta value.
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM meta WHERE key = ?1",
                libsql::params![key],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// Read a meta entry's conflict timestamp, if it has one.
    pub(crate) async fn get_meta_updated_at(
        &self,
        key: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT updated_at FROM meta WHERE key = ?1",
                libsql::params![key],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<String>(0).ok().as_deref().map(parse_datetime)),
            None => Ok(None),
        }
    }

    /// Write a device-local meta value (cursor, flags, identity). Never
    /// enqueued; carries no conflict timestamp.
    pub async fn set_meta_local(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO meta (key, value, updated_at) VALUES (?1, ?2, NULL)",
                libsql::params![key, value],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Write a meta value with an explicit conflict timestamp — used when
    /// merging pulled settings rows.
    pub(crate) async fn set_meta_with_ts(
        &self,
        key: &str,
        value: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO meta (key, value, updated_at) VALUES (?1, ?2, ?3)",
                libsql::params![key, value, fmt_ts(updated_at)],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Write a user setting and mirror it to the remote.
    ///
    /// Keys outside the synced set are written locally only — identity and
    /// cursor keys never leave the device.
    pub async fn set_meta_synced(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        if !is_synced_meta_key(key) {
            return self.set_meta_local(key, value).await;
        }
        let now = Utc::now();
        let now_text = fmt_ts(now);
        let payload = serde_json::json!({
            "key": key,
            "value": value,
            "updatedAt": now_text,
        });
        let tx = self.conn().transaction().await.map_err(db_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value, updated_at) VALUES (?1, ?2, ?3)",
            libsql::params![key, value, now_text.as_str()],
        )
        .await
        .map_err(db_err)?;
        enqueue_op(&tx, "meta", key, OpKind::Update, &payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(())
    }

    /// All meta entries.
    pub async fn list_meta(&self) -> Result<Vec<MetaItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT key, value, updated_at FROM meta ORDER BY key", ())
            .await
            .map_err(db_err)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            items.push(MetaItem {
                key: row.get(0).map_err(db_err)?,
                value: row.get(1).map_err(db_err)?,
                updated_at: row.get::<String>(2).ok().as_deref().map(parse_datetime),
            });
        }
        Ok(items)
    }

    /// The synced user id, defaulting to the shared identity.
    pub async fn user_id(&self) -> Result<String, DatabaseError> {
        Ok(self
            .get_meta(keys::USER_ID)
            .await?
            .unwrap_or_else(|| "shared-user".to_string()))
    }

    /// This device's generated id.
    pub async fn device_id(&self) -> Result<Option<String>, DatabaseError> {
        self.get_meta(keys::DEVICE_ID).await
    }
}
