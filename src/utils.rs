//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Event timestamps are assigned by the event log at append time; this
/// helper exists for log-local stamping and for validator clock checks.
#[must_use]
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Ceiling division for pro-rata fee math: `ceil(a * b / c)`.
///
/// Saturates to `u64::MAX` on overflow of the final narrowing; callers cap
/// the result against the order's remaining fee anyway.
#[must_use]
pub fn mul_div_ceil(a: u64, b: u64, c: u64) -> u64 {
    if c == 0 {
        return 0;
    }
    let num = (a as u128) * (b as u128);
    let div = c as u128;
    let out = num.div_ceil(div);
    u64::try_from(out).unwrap_or(u64::MAX)
}
