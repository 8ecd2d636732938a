//! Query time parsing
//!
//! Query boundaries arrive as Unix seconds (float, nanoseconds in the
//! fractional part), RFC3339 with nanosecond precision, or the sentinels
//! `minTime`/`maxTime` for the extremes of the int64 nanosecond range.

use chrono::DateTime;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ModelError;
use crate::utils::parse_duration;

/// Sentinel accepted for the smallest representable query time.
pub const MIN_TIME: &str = "minTime";

/// Sentinel accepted for the largest representable query time.
pub const MAX_TIME: &str = "maxTime";

/// Current system time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_nanos() as i64
}

/// Parses a query timestamp into nanoseconds since the Unix epoch.
pub fn parse_timestamp(s: &str) -> Result<i64, ModelError> {
    match s {
        MIN_TIME => return Ok(i64::MIN),
        MAX_TIME => return Ok(i64::MAX),
        _ => {}
    }
    if let Ok(seconds) = s.parse::<f64>() {
        // fractional seconds rounded to millisecond precision
        let whole = seconds.trunc();
        let frac = ((seconds - whole) * 1000.0).round() / 1000.0;
        return Ok(whole as i64 * 1_000_000_000 + (frac * 1e9) as i64);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        if let Some(nanos) = t.timestamp_nanos_opt() {
            return Ok(nanos);
        }
    }
    Err(ModelError::InvalidTimestamp(s.to_string()))
}

/// Parses a relative time expression such as `now-1h` into an offset from
/// now. A bare duration (without the `now-` prefix) is accepted too.
pub fn parse_relative_time(s: &str) -> Result<Duration, ModelError> {
    let s = s.trim();
    let s = s.strip_prefix("now-").unwrap_or(s);
    parse_duration(s)
}

/// Converts epoch nanoseconds to epoch milliseconds.
pub fn nanos_to_millis(nanos: i64) -> i64 {
    nanos / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_seconds() {
        assert_eq!(parse_timestamp("100").unwrap(), 100_000_000_000);
        assert_eq!(parse_timestamp("100.5").unwrap(), 100_500_000_000);
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:01Z").unwrap(), 1_000_000_000);
        assert_eq!(
            parse_timestamp("1970-01-01T00:00:00.000000123Z").unwrap(),
            123
        );
    }

    #[test]
    fn test_parse_sentinels() {
        assert_eq!(parse_timestamp(MIN_TIME).unwrap(), i64::MIN);
        assert_eq!(parse_timestamp(MAX_TIME).unwrap(), i64::MAX);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("not-a-time").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_parse_relative_time() {
        assert_eq!(parse_relative_time("now-1h").unwrap().as_secs(), 3600);
        assert_eq!(parse_relative_time("30s").unwrap().as_secs(), 30);
        assert!(parse_relative_time("now-").is_err());
    }

    #[test]
    fn test_nanos_to_millis() {
        assert_eq!(nanos_to_millis(1_500_000_000), 1500);
    }
}
