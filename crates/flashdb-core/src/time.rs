//! Wall-clock expiry timestamps.
//!
//! Expiry deadlines are absolute nanoseconds since the Unix epoch so
//! they survive snapshot save/load across process restarts. `0` is the
//! "never expires" sentinel, matching the snapshot format where any
//! non-positive stored value means no expiry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sentinel value meaning "no expiry".
pub const NO_EXPIRY: i64 = 0;

/// Returns the current wall-clock time in nanoseconds since the epoch.
#[inline]
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Returns true if the given expiry timestamp has passed.
#[inline]
pub fn is_expired(expires_at_ns: i64) -> bool {
    expires_at_ns != NO_EXPIRY && now_ns() >= expires_at_ns
}

/// Converts an optional TTL to an absolute expiry timestamp.
///
/// `None` and zero-length TTLs both map to the sentinel.
#[inline]
pub fn expiry_after(ttl: Option<Duration>) -> i64 {
    match ttl {
        Some(d) if !d.is_zero() => now_ns().saturating_add(d.as_nanos() as i64),
        _ => NO_EXPIRY,
    }
}

/// Returns the remaining TTL in whole seconds (rounded up), or `None`
/// for the sentinel.
///
/// Rounding up means a key given a 5 second TTL reports `5` when asked
/// immediately, not `4`.
#[inline]
pub fn remaining_secs(expires_at_ns: i64) -> Option<i64> {
    if expires_at_ns == NO_EXPIRY {
        return None;
    }
    let left = expires_at_ns - now_ns();
    Some((left + 999_999_999).div_euclid(1_000_000_000))
}
