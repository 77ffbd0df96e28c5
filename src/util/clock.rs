//! Wall-clock helpers.
//!
//! Scheduling works in whole seconds; the sub-second part of an instant only
//! carries the role priority used to break ties between tasks due in the same
//! second.

use chrono::{DateTime, TimeDelta, Utc};

/// Current wall-clock instant.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Instant at the given whole second with `offset_ns` nanoseconds added.
#[must_use]
pub fn at_second(seconds: i64, offset_ns: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, offset_ns).unwrap_or_default()
}

/// `instant` shifted by `seconds` (negative values go back in time).
#[must_use]
pub fn add_seconds(instant: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(seconds)
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(instant)
}
