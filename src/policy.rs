//! Last-writer-wins conflict resolution.
//!
//! The same rule runs on both sides of the protocol: the remote authority
//! consults it before upserting or soft-deleting a pushed op, and the sync
//! client consults it before merging a pulled row. Ties favor the incoming
//! version, which is what makes re-application idempotent under retry.

use chrono::{DateTime, Utc};

/// Decide whether an incoming entity version should replace the stored one.
///
/// A missing stored timestamp means the entity is unknown and the incoming
/// version is always accepted. Deletions carry their own timestamp and go
/// through the identical comparison, so a late-arriving update older than a
/// recorded delete does not resurrect the entity.
pub fn should_apply(current: Option<DateTime<Utc>>, incoming: DateTime<Utc>) -> bool {
    match current {
        None => true,
        Some(current) => current <= incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn absent_current_always_accepts() {
        assert!(should_apply(None, ts(0)));
        assert!(should_apply(None, ts(1_700_000_000)));
    }

    #[test]
    fn newer_incoming_wins() {
        assert!(should_apply(Some(ts(100)), ts(200)));
    }

    #[test]
    fn older_incoming_loses() {
        assert!(!should_apply(Some(ts(200)), ts(100)));
    }

    #[test]
    fn tie_favors_incoming() {
        assert!(should_apply(Some(ts(100)), ts(100)));
    }
}
