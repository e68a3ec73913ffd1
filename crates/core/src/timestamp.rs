//! Epoch-millisecond timestamps as stored in the inventory and status files.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Render epoch milliseconds as an RFC 3339 date; `"(never)"` for zero or
/// negative values.
pub fn format_millis(ms: i64) -> String {
    if ms <= 0 {
        return "(never)".to_string();
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}

/// Milliseconds since the Unix epoch at the most recent UTC midnight.
pub fn start_of_day_millis() -> i64 {
    let now = OffsetDateTime::now_utc();
    let midnight = now.replace_time(time::Time::MIDNIGHT);
    midnight.unix_timestamp() * 1000
}
