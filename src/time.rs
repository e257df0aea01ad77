//! Time utilities.
//!
//! Instants on the wire are Unix epoch milliseconds.

use std::time::Duration;

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Instant `lifetime` from now, in epoch milliseconds.
pub fn expiration_after(lifetime: Duration) -> i64 {
    now_timestamp_millis().saturating_add(i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX))
}

/// Whether an optional expiry instant has passed.
pub fn is_expired(expiration_instant: Option<i64>) -> bool {
    expiration_instant.is_some_and(|instant| instant <= now_timestamp_millis())
}
