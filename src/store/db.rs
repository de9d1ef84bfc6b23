//! Local durable store — libSQL connection, first-run seeding, and change
//! notification channels.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::meta::keys;
use crate::store::migrations;

/// The on-device store.
///
/// Owns all local state: entity tables plus the ops queue. Every mutation
/// of a syncable entity writes the entity and its outbox entry in one
/// transaction, then signals the outbox watch channel.
pub struct LocalStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    outbox_tx: watch::Sender<u64>,
    outbox_seq: AtomicU64,
    changes_tx: watch::Sender<u64>,
    changes_seq: AtomicU64,
}

impl LocalStore {
    /// Open (or create) a local database file, run migrations, and seed
    /// default metadata.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open local database: {e}")))?;

        let store = Self::from_db(db)?;
        store.init().await?;
        info!(path = %path.display(), "Local store opened");
        Ok(store)
    }

    /// Create an in-memory store (for tests).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let store = Self::from_db(db)?;
        store.init().await?;
        Ok(store)
    }

    fn from_db(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        let (outbox_tx, _) = watch::channel(0);
        let (changes_tx, _) = watch::channel(0);
        Ok(Self {
            db: Arc::new(db),
            conn,
            outbox_tx,
            outbox_seq: AtomicU64::new(0),
            changes_tx,
            changes_seq: AtomicU64::new(0),
        })
    }

    async fn init(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await?;
        self.seed_defaults().await?;
        Ok(())
    }

    /// Get the connection.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Subscribe to outbox-changed notifications. The value is a
    /// monotonically increasing counter; consumers only care that it moved.
    pub fn subscribe_outbox(&self) -> watch::Receiver<u64> {
        self.outbox_tx.subscribe()
    }

    /// Subscribe to local-data-changed notifications, fired after a pull
    /// merges remote rows so observers re-read current state.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes_tx.subscribe()
    }

    pub(crate) fn notify_outbox(&self) {
        let n = self.outbox_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.outbox_tx.send_replace(n);
    }

    pub(crate) fn notify_changes(&self) {
        let n = self.changes_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.changes_tx.send_replace(n);
    }

    /// Seed default metadata on first run.
    ///
    /// Each key is checked and set independently so a partially seeded
    /// store heals itself on the next startup instead of corrupting state.
    async fn seed_defaults(&self) -> Result<(), DatabaseError> {
        let device_id = format!("device-{}", Uuid::new_v4());
        let today = today_key();
        let seeds: &[(&str, String)] = &[
            (keys::DEVICE_ID, device_id),
            (keys::USER_ID, "shared-user".to_string()),
            (keys::SELECTED_DAY_KEY, today),
            (keys::WAKE_TIME, "07:00".to_string()),
            (keys::SLEEP_TIME, "23:00".to_string()),
            (keys::APPLY_ROUTINE_ALL_DAYS, "false".to_string()),
            (keys::WARN_OVERBOOKED, "true".to_string()),
            (keys::BLOCK_OVERBOOKED, "false".to_string()),
            (keys::LAST_SYNC_CURSOR, epoch_cursor()),
        ];
        for (key, value) in seeds {
            let existing = self.get_meta(key).await?;
            if existing.is_none() {
                self.conn
                    .execute(
                        "INSERT OR IGNORE INTO meta (key, value) VALUES (?1, ?2)",
                        libsql::params![*key, value.as_str()],
                    )
                    .await
                    .map_err(db_err)?;
            }
        }
        Ok(())
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Map a libsql error to a query error.
pub(crate) fn db_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Canonical timestamp format for stored columns: RFC 3339 with millisecond
/// precision and a `Z` suffix. One fixed format keeps SQL text comparisons
/// (`updated_at > ?`) consistent with chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn fmt_opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(fmt_ts)
}

/// Parse an RFC 3339 or SQLite datetime string into `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

pub(crate) fn parse_opt_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

/// The cursor value meaning "never synced".
pub(crate) fn epoch_cursor() -> String {
    "1970-01-01T00:00:00.000Z".to_string()
}

/// Today's calendar key in local time, `YYYY-MM-DD`.
pub(crate) fn today_key() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Parse a JSON array column, tolerating junk by falling back to empty.
pub(crate) fn json_vec<T: serde::de::DeserializeOwned>(s: &str) -> Vec<T> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Serialize a value for a JSON TEXT column.
pub(crate) fn json_text<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}
