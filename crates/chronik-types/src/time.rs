use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Inclusive timestamp interval, in microseconds since the POSIX epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    /// Create a range. Fails if `start` is after `end`.
    pub fn new(start: i64, end: i64) -> Result<Self, TypeError> {
        if start > end {
            return Err(TypeError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Returns `true` if the timestamp falls inside the range.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Current wall-clock time in microseconds since the POSIX epoch.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Parse an RFC 3339 date-time string into epoch microseconds.
///
/// A bare date-time without an offset is interpreted as UTC.
pub fn timestamp_from_rfc3339(value: &str) -> Result<i64, TypeError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.timestamp_micros());
    }
    // Tolerate the offset-free form produced by extraction tooling.
    let with_offset = format!("{value}Z");
    DateTime::parse_from_rfc3339(&with_offset)
        .map(|parsed| parsed.timestamp_micros())
        .map_err(|err| TypeError::InvalidTimestamp(format!("{value}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_rejects_inverted_bounds() {
        let err = TimeRange::new(10, 5).unwrap_err();
        assert_eq!(err, TypeError::InvalidTimeRange { start: 10, end: 5 });
    }

    #[test]
    fn range_contains_is_inclusive() {
        let range = TimeRange::new(5, 10).unwrap();
        assert!(range.contains(5));
        assert!(range.contains(10));
        assert!(!range.contains(4));
        assert!(!range.contains(11));
    }

    #[test]
    fn parses_offset_free_timestamps_as_utc() {
        let micros = timestamp_from_rfc3339("2012-04-20T22:38:46").unwrap();
        assert_eq!(micros, 1_334_961_526_000_000);
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let utc = timestamp_from_rfc3339("2012-04-20T22:38:46Z").unwrap();
        let offset = timestamp_from_rfc3339("2012-04-21T00:38:46+02:00").unwrap();
        assert_eq!(utc, offset);
    }

    #[test]
    fn rejects_garbage() {
        assert!(timestamp_from_rfc3339("not a date").is_err());
    }

    #[test]
    fn ordering_of_sample_dates() {
        let a = timestamp_from_rfc3339("2009-04-05T12:27:39").unwrap();
        let b = timestamp_from_rfc3339("2012-04-20T16:44:46").unwrap();
        let c = timestamp_from_rfc3339("2012-04-20T22:38:46").unwrap();
        let d = timestamp_from_rfc3339("2012-05-02T13:43:26").unwrap();
        assert!(a < b && b < c && c < d);
    }
}
