//! Freshness checks for received timestamps.

use chrono::Utc;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// `true` if `timestamp` is within `window_ms` of our clock, either way.
pub fn check_timestamp(timestamp: u64, window_ms: u64) -> bool {
    check_timestamp_at(timestamp, now_millis(), window_ms)
}

/// [`check_timestamp`] against an explicit `now`. Both bounds inclusive.
pub fn check_timestamp_at(timestamp: u64, now: u64, window_ms: u64) -> bool {
    now.saturating_sub(window_ms) <= timestamp && timestamp <= now.saturating_add(window_ms)
}
