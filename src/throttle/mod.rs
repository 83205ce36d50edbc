use chrono::{DateTime, TimeZone, Utc};

use crate::models::{AccountState, Interval};

/// Floor a timestamp to the start of its interval bucket.
///
/// Buckets are aligned to the Unix epoch, so hourly buckets start on the
/// hour, daily buckets at 00:00 UTC, and so on.
pub fn bucket_start(at: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    let bucket_secs = interval.duration().num_seconds();
    let floored = at.timestamp().div_euclid(bucket_secs) * bucket_secs;
    Utc.timestamp_opt(floored, 0).unwrap()
}

/// Whether the account already committed an evaluation outcome in the
/// current bucket. A true result means the tick must be skipped with no
/// state change.
pub fn already_evaluated(account: &AccountState, now: DateTime<Utc>) -> bool {
    match account.last_evaluated_bucket {
        Some(marker) => marker == bucket_start(now, account.interval),
        None => false,
    }
}

/// Stamp the account with the current bucket. Called once per evaluated
/// tick, whatever the outcome, so at most one outcome is committed per
/// account per interval.
pub fn mark_evaluated(account: &mut AccountState, now: DateTime<Utc>) {
    account.last_evaluated_bucket = Some(bucket_start(now, account.interval));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SizingMode;

    fn test_account(interval: Interval) -> AccountState {
        AccountState::new(
            "BTC-USDT".to_string(),
            interval,
            SizingMode::Fixed { base_usd: 6.0 },
            10000.0,
        )
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_bucket_floors_to_hour() {
        assert_eq!(
            bucket_start(at("2025-03-01T14:37:21Z"), Interval::H1),
            at("2025-03-01T14:00:00Z")
        );
        assert_eq!(
            bucket_start(at("2025-03-01T14:00:00Z"), Interval::H1),
            at("2025-03-01T14:00:00Z")
        );
    }

    #[test]
    fn test_bucket_floors_to_quarter_hour() {
        assert_eq!(
            bucket_start(at("2025-03-01T14:37:21Z"), Interval::M15),
            at("2025-03-01T14:30:00Z")
        );
    }

    #[test]
    fn test_bucket_floors_to_day() {
        assert_eq!(
            bucket_start(at("2025-03-01T14:37:21Z"), Interval::D1),
            at("2025-03-01T00:00:00Z")
        );
    }

    #[test]
    fn test_fresh_account_is_not_throttled() {
        let account = test_account(Interval::H1);
        assert!(!already_evaluated(&account, at("2025-03-01T14:05:00Z")));
    }

    #[test]
    fn test_same_bucket_is_throttled() {
        let mut account = test_account(Interval::H1);
        mark_evaluated(&mut account, at("2025-03-01T14:05:00Z"));

        assert!(already_evaluated(&account, at("2025-03-01T14:59:59Z")));
    }

    #[test]
    fn test_next_bucket_is_evaluated_again() {
        let mut account = test_account(Interval::H1);
        mark_evaluated(&mut account, at("2025-03-01T14:05:00Z"));

        assert!(!already_evaluated(&account, at("2025-03-01T15:00:00Z")));
    }

    #[test]
    fn test_marker_stores_bucket_start_not_tick_time() {
        let mut account = test_account(Interval::H4);
        mark_evaluated(&mut account, at("2025-03-01T15:12:00Z"));

        assert_eq!(
            account.last_evaluated_bucket,
            Some(at("2025-03-01T12:00:00Z"))
        );
    }
}
