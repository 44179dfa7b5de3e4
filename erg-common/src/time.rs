//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current Unix epoch time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format a timestamp for storage
///
/// Fixed-width UTC with millisecond precision, so stored values sort
/// lexicographically in chronological order.
pub fn to_db_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub fn from_db_string(s: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Invalid timestamp in database '{}': {}", s, e)))
}
