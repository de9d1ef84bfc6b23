//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Sync client configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the sync endpoint (e.g. `https://sync.example.com`).
    /// `None` means sync is not configured and the client runs in
    /// local-only mode.
    pub api_base: Option<String>,
    /// Periodic sync interval.
    pub interval: Duration,
    /// Debounce applied to outbox-changed notifications, so a burst of
    /// writes coalesces into a single sync cycle.
    pub debounce: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            interval: Duration::from_secs(60),
            debounce: Duration::from_millis(1200),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Configuration pointing at a sync endpoint, default cadence.
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: Some(api_base.into()),
            ..Default::default()
        }
    }

    /// Read configuration from the environment.
    ///
    /// `DAYFLOW_SYNC_URL` selects the endpoint (absent means local-only);
    /// `DAYFLOW_SYNC_INTERVAL_SECS` overrides the periodic cadence.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("DAYFLOW_SYNC_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if !url.is_empty() {
                config.api_base = Some(url);
            }
        }
        if let Ok(secs) = std::env::var("DAYFLOW_SYNC_INTERVAL_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "DAYFLOW_SYNC_INTERVAL_SECS".into(),
                message: format!("expected seconds, got {secs:?}"),
            })?;
            config.interval = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_local_only() {
        let config = SyncConfig::default();
        assert!(config.api_base.is_none());
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.debounce, Duration::from_millis(1200));
    }

    #[test]
    fn with_api_base_sets_endpoint() {
        let config = SyncConfig::with_api_base("http://localhost:8787");
        assert_eq!(config.api_base.as_deref(), Some("http://localhost:8787"));
    }
}
