//! Millisecond timestamp helpers.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

pub const HOUR_MS: i64 = 60 * 60 * 1000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix milliseconds to a UTC datetime.
pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Human-readable UTC timestamp, e.g. `2024-05-01 08:00:00`.
pub fn format_timestamp(ms: i64) -> String {
    ms_to_datetime(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Parse `YYYY-MM-DD` (midnight UTC) or RFC 3339 into Unix milliseconds.
pub fn parse_time_ms(input: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp_millis());
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD or RFC 3339", input))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("Invalid time of day")?;
    Ok(midnight.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let ms = parse_time_ms("2024-05-01").unwrap();
        assert_eq!(ms, 1_714_521_600_000);
        assert_eq!(format_timestamp(ms + 8 * HOUR_MS), "2024-05-01 08:00:00");

        let rfc = parse_time_ms("2024-05-01T08:00:00Z").unwrap();
        assert_eq!(rfc, ms + 8 * HOUR_MS);

        assert!(parse_time_ms("May 1st").is_err());
    }
}
