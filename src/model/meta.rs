//! Process-wide key/value metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known meta keys.
pub mod keys {
    pub const DEVICE_ID: &str = "deviceId";
    pub const USER_ID: &str = "userId";
    pub const SELECTED_DAY_KEY: &str = "selectedDayKey";
    pub const WAKE_TIME: &str = "wakeTime";
    pub const SLEEP_TIME: &str = "sleepTime";
    pub const APPLY_ROUTINE_ALL_DAYS: &str = "applyRoutineAllDays";
    pub const WARN_OVERBOOKED: &str = "warnOverbooked";
    pub const BLOCK_OVERBOOKED: &str = "blockOverbooked";
    pub const LAST_SYNC_CURSOR: &str = "lastSyncCursor";
    pub const PLANS_SYNC_BOOTSTRAPPED: &str = "plansSyncBootstrapped";
}

/// Meta keys that participate in sync. Identity and cursor keys are
/// device-local and must never be overwritten by a pull.
pub const SYNCED_META_KEYS: &[&str] = &[
    keys::SELECTED_DAY_KEY,
    keys::WAKE_TIME,
    keys::SLEEP_TIME,
    keys::APPLY_ROUTINE_ALL_DAYS,
    keys::WARN_OVERBOOKED,
    keys::BLOCK_OVERBOOKED,
];

/// Whether a meta key is accepted from (and mirrored to) the remote.
pub fn is_synced_meta_key(key: &str) -> bool {
    SYNCED_META_KEYS.contains(&key)
}

/// A single key/value settings entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaItem {
    pub key: String,
    pub value: String,
    /// Set for entries that participate in conflict resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_keys_are_not_synced() {
        assert!(!is_synced_meta_key(keys::DEVICE_ID));
        assert!(!is_synced_meta_key(keys::USER_ID));
        assert!(!is_synced_meta_key(keys::LAST_SYNC_CURSOR));
        assert!(!is_synced_meta_key(keys::PLANS_SYNC_BOOTSTRAPPED));
    }

    #[test]
    fn routine_keys_are_synced() {
        assert!(is_synced_meta_key(keys::WAKE_TIME));
        assert!(is_synced_meta_key(keys::SLEEP_TIME));
        assert!(is_synced_meta_key(keys::SELECTED_DAY_KEY));
    }
}
