use chrono::Utc;

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Next timestamp for a monotonically increasing field.
///
/// Returns the current time, or `previous + 1` when the clock has not moved
/// past `previous` (same millisecond or a backwards step).
pub fn next_millis_after(previous: i64) -> i64 {
    now_millis().max(previous.saturating_add(1))
}
