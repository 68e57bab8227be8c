//! Timestamp utilities
//!
//! All timestamps are stored as RFC 3339 UTC strings with a fixed
//! microsecond precision, so string order matches time order in SQL.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format for storage
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn from_db(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db).transpose()
}

/// Whole days elapsed from `start` to `end`, never negative
pub fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    end.signed_duration_since(start).num_days().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 1_700_000_000);
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01
    }

    #[test]
    fn test_db_roundtrip_preserves_micros() {
        let ts = now();
        let parsed = from_db(&to_db(&ts)).unwrap();
        assert_eq!(parsed.timestamp_micros(), ts.timestamp_micros());
    }

    #[test]
    fn test_db_strings_sort_chronologically() {
        let a = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").unwrap().with_timezone(&Utc);
        let b = a + Duration::milliseconds(500);
        let c = a + Duration::seconds(1);
        assert!(to_db(&a) < to_db(&b));
        assert!(to_db(&b) < to_db(&c));
        assert_eq!(to_db(&a), "2026-03-01T10:00:00.000000Z");
    }

    #[test]
    fn test_from_db_rejects_garbage() {
        assert!(from_db("yesterday").is_err());
    }

    #[test]
    fn test_days_between_truncates_and_clamps() {
        let start = now();
        assert_eq!(days_between(start, start + Duration::hours(47)), 1);
        assert_eq!(days_between(start, start + Duration::days(30)), 30);
        assert_eq!(days_between(start, start - Duration::days(3)), 0);
    }
}
