//! Next-check calculation for item delays.

use chrono::{DateTime, Utc};

use crate::core::SchedulerError;
use crate::util::clock::at_second;
use crate::util::interval::parse_seconds;

/// Computes when an item is checked next.
pub trait NextCheck: Send + Sync {
    /// Returns the next check instant after `now` and whether the delay is a
    /// plain fixed interval.
    ///
    /// # Errors
    ///
    /// Fails when the delay specification cannot be used.
    fn next_check(
        &self,
        itemid: u64,
        delay: &str,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, bool), SchedulerError>;
}

/// Fixed-interval calculator spreading items over their interval by item id.
///
/// Flexible and scheduling segments after `;` are not evaluated; the base
/// interval is used and the schedule is reported as not simple.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalNextCheck;

impl NextCheck for IntervalNextCheck {
    fn next_check(
        &self,
        itemid: u64,
        delay: &str,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, bool), SchedulerError> {
        let (base, rest) = delay.split_once(';').map_or((delay, None), |(b, r)| (b, Some(r)));
        if base.contains('{') {
            return Err(SchedulerError::InvalidDelay {
                delay: delay.to_string(),
                reason: "user macros are not supported".into(),
            });
        }
        let interval = parse_seconds(base)?;
        if interval == 0 {
            return Err(SchedulerError::InvalidDelay {
                delay: delay.to_string(),
                reason: "zero interval".into(),
            });
        }
        let interval = i64::try_from(interval).map_err(|_| SchedulerError::InvalidDelay {
            delay: delay.to_string(),
            reason: "interval out of range".into(),
        })?;
        let seconds = now.timestamp();
        let offset = i64::try_from(itemid % interval.unsigned_abs()).unwrap_or(0);
        let mut next = interval * seconds.div_euclid(interval) + offset;
        while next <= seconds {
            next += interval;
        }
        Ok((at_second(next, 0), rest.is_none_or(str::is_empty)))
    }
}
