//! Sync client — drains the outbox to the remote (push), then merges
//! remote deltas since the last cursor (pull).
//!
//! One cycle is push-then-pull, guarded so concurrent invocations collapse
//! into one run. Triggers: a periodic tick, a debounced reaction to
//! outbox-changed notifications, a connectivity-regained signal, and an
//! explicit user-initiated force sync. Background failures are logged and
//! retried next cycle; only user-initiated syncs surface errors.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::meta::keys;
use crate::model::op::{OpKind, is_syncable_entity_type};
use crate::store::{LocalStore, epoch_cursor, fmt_ts};
use crate::sync::protocol::{AckResponse, PullResponse, PushOp, read_response_error};

/// What a sync invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A full push/pull cycle ran.
    Synced,
    /// Another cycle was already in flight; this invocation exited
    /// immediately without error.
    AlreadyRunning,
}

/// External triggers for the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// Connectivity was regained; attempt a sync immediately.
    Online,
    /// User-initiated force sync.
    Force,
}

/// Cloneable handle for delivering [`SyncSignal`]s to a running loop.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncSignal>,
}

impl SyncHandle {
    /// Signal that the host regained connectivity.
    pub async fn online(&self) {
        let _ = self.tx.send(SyncSignal::Online).await;
    }

    /// Request an immediate sync.
    pub async fn force(&self) {
        let _ = self.tx.send(SyncSignal::Force).await;
    }
}

/// Create the signal channel for [`SyncClient::run`].
pub fn signal_channel() -> (SyncHandle, mpsc::Receiver<SyncSignal>) {
    let (tx, rx) = mpsc::channel(8);
    (SyncHandle { tx }, rx)
}

/// The sync client. Constructed once at startup and handed the store by
/// reference; holds no state beyond the in-flight guard.
pub struct SyncClient {
    store: Arc<LocalStore>,
    config: SyncConfig,
    http: reqwest::Client,
    in_flight: tokio::sync::Mutex<()>,
}

impl SyncClient {
    pub fn new(store: Arc<LocalStore>, config: SyncConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            store,
            config,
            http,
            in_flight: tokio::sync::Mutex::new(()),
        })
    }

    /// Whether a sync endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.config.api_base.is_some()
    }

    /// Run one push/pull cycle now.
    ///
    /// This is the user-initiated path: errors propagate to the caller for
    /// display. Without a configured endpoint it fails fast; the app keeps
    /// working local-only.
    pub async fn sync_now(&self) -> Result<SyncOutcome, SyncError> {
        let Some(api_base) = self.config.api_base.clone() else {
            return Err(SyncError::NotConfigured);
        };
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Ok(SyncOutcome::AlreadyRunning);
        };
        self.push(&api_base).await?;
        self.pull(&api_base).await?;
        Ok(SyncOutcome::Synced)
    }

    /// Drive the sync loop until the signal channel closes.
    ///
    /// Ticks every `config.interval`, reacts to outbox changes after
    /// `config.debounce`, and services [`SyncSignal`]s. A no-op when sync
    /// is not configured.
    pub async fn run(self: Arc<Self>, mut signals: mpsc::Receiver<SyncSignal>) {
        if !self.is_configured() {
            info!("Sync not configured; running local-only");
            return;
        }
        let mut outbox_rx = self.store.subscribe_outbox();
        let mut tick = tokio::time::interval(self.config.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut debounce: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.background_sync("interval").await;
                }
                changed = outbox_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Coalesce bursts of writes into one cycle.
                    debounce = Some(Box::pin(tokio::time::sleep(self.config.debounce)));
                }
                () = async { debounce.as_mut().expect("guarded by branch condition").as_mut().await },
                    if debounce.is_some() =>
                {
                    debounce = None;
                    self.background_sync("outbox").await;
                }
                signal = signals.recv() => match signal {
                    Some(SyncSignal::Online) => self.background_sync("online").await,
                    Some(SyncSignal::Force) => {
                        if let Err(error) = self.sync_now().await {
                            warn!(%error, "Manual sync failed");
                        }
                    }
                    None => break,
                },
            }
        }
    }

    /// Background invocation: failures are logged, never surfaced. The
    /// outbox and cursor are untouched on failure, so the next cycle
    /// retries from the same point.
    async fn background_sync(&self, trigger: &str) {
        match self.sync_now().await {
            Ok(SyncOutcome::Synced) => debug!(trigger, "Sync cycle complete"),
            Ok(SyncOutcome::AlreadyRunning) => debug!(trigger, "Sync already running"),
            Err(error) => debug!(trigger, %error, "Background sync failed"),
        }
    }

    /// Push: transmit pending ops in queue order, then drop every op the
    /// server acknowledged. Unsupported entity types are removed from the
    /// queue without transmission so they can never wedge it.
    async fn push(&self, api_base: &str) -> Result<(), SyncError> {
        let pending = self.store.pending_ops().await?;
        if pending.is_empty() {
            return Ok(());
        }

        let (supported, unsupported): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|op| is_syncable_entity_type(&op.entity_type));
        if !unsupported.is_empty() {
            let dropped: Vec<String> = unsupported.into_iter().map(|op| op.op_id).collect();
            debug!(count = dropped.len(), "Dropping unsupported ops from outbox");
            self.store.remove_ops(&dropped).await?;
        }
        if supported.is_empty() {
            return Ok(());
        }

        let ops: Vec<PushOp> = supported.iter().map(PushOp::from).collect();
        let user_id = self.store.user_id().await?;
        let response = self
            .http
            .post(format!("{api_base}/sync/push"))
            .header("x-user-id", user_id)
            .json(&ops)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = read_response_error(response).await;
            return Err(SyncError::Push { status, message });
        }

        let body: AckResponse = response.json().await?;
        if !body.acked.is_empty() {
            debug!(acked = body.acked.len(), "Push acknowledged");
            self.store.remove_ops(&body.acked).await?;
        }
        Ok(())
    }

    /// Pull: fetch deltas since the cursor, merge per table under the
    /// last-writer-wins policy, then advance the cursor. A failure leaves
    /// the cursor untouched, so deltas are redelivered on retry.
    async fn pull(&self, api_base: &str) -> Result<(), SyncError> {
        self.bootstrap_plans().await?;

        let cursor = self
            .store
            .get_meta(keys::LAST_SYNC_CURSOR)
            .await?
            .unwrap_or_else(epoch_cursor);
        let user_id = self.store.user_id().await?;
        let response = self
            .http
            .get(format!("{api_base}/sync/pull"))
            .query(&[("cursor", cursor.as_str())])
            .header("x-user-id", user_id)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = read_response_error(response).await;
            return Err(SyncError::Pull { status, message });
        }
        let data: PullResponse = response.json().await?;

        let tasks: Vec<_> = data.tasks.into_iter().map(|r| r.into_task()).collect();
        let notes: Vec<_> = data.notes.into_iter().map(|r| r.into_note()).collect();
        let links: Vec<_> = data.links.into_iter().map(|r| r.into_remote_link()).collect();
        let plans: Vec<_> = data.plans.into_iter().map(|r| r.into_plan()).collect();
        let inbox: Vec<_> = data
            .inbox_items
            .into_iter()
            .map(|r| r.into_inbox_item())
            .collect();
        let meta: Vec<_> = data.meta.into_iter().map(|r| r.into_remote_meta()).collect();

        self.store.apply_remote_tasks(tasks).await?;
        self.store.apply_remote_notes(notes).await?;
        self.store.apply_remote_links(links).await?;
        self.store.apply_remote_plans(plans).await?;
        self.store
            .apply_remote_inbox_items(inbox)
            .await?;
        self.store.apply_remote_meta(meta).await?;

        let new_cursor = data.new_cursor.unwrap_or_else(|| fmt_ts(Utc::now()));
        self.store
            .set_meta_local(keys::LAST_SYNC_CURSOR, &new_cursor)
            .await?;
        debug!(cursor = %new_cursor, "Pull applied");

        self.store.notify_changes();
        Ok(())
    }

    /// Backfill plans that existed before sync was wired up, exactly once.
    ///
    /// Guarded by a persisted flag; plans that already have a pending op
    /// are skipped so the backfill never duplicates in-flight work.
    async fn bootstrap_plans(&self) -> Result<(), SyncError> {
        let bootstrapped = self
            .store
            .get_meta(keys::PLANS_SYNC_BOOTSTRAPPED)
            .await?;
        if bootstrapped.as_deref() == Some("true") {
            return Ok(());
        }

        let plans = self.store.list_plans().await?;
        if plans.is_empty() {
            self.store
                .set_meta_local(keys::PLANS_SYNC_BOOTSTRAPPED, "true")
                .await?;
            return Ok(());
        }

        let pending_plan_ids: std::collections::HashSet<String> = self
            .store
            .pending_ops()
            .await?
            .into_iter()
            .filter(|op| op.entity_type == "plan")
            .map(|op| op.entity_id)
            .collect();

        let mut backfilled = 0usize;
        for plan in &plans {
            if pending_plan_ids.contains(&plan.id) {
                continue;
            }
            let payload = serde_json::to_value(plan)
                .map_err(|e| crate::error::DatabaseError::Serialization(e.to_string()))?;
            self.store
                .enqueue_standalone("plan", &plan.id, OpKind::Create, &payload)
                .await?;
            backfilled += 1;
        }
        if backfilled > 0 {
            info!(count = backfilled, "Backfilled pre-sync plans into outbox");
        }
        self.store
            .set_meta_local(keys::PLANS_SYNC_BOOTSTRAPPED, "true")
            .await?;
        Ok(())
    }
}
