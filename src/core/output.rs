//! Item results and the sink contract results are written to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one check for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Item identifier.
    pub itemid: u64,
    /// Value text, when the check produced one.
    pub value: Option<String>,
    /// Error text, when the check failed.
    pub error: Option<String>,
    /// Log position after the check.
    pub last_logsize: Option<u64>,
    /// Log modification time after the check.
    pub mtime: Option<i32>,
    /// When the result was produced.
    pub ts: DateTime<Utc>,
}

impl ItemResult {
    /// Successful result.
    pub fn value(itemid: u64, value: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self {
            itemid,
            value: Some(value.into()),
            error: None,
            last_logsize: None,
            mtime: None,
            ts,
        }
    }

    /// Failed result.
    pub fn error(itemid: u64, error: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self {
            itemid,
            value: None,
            error: Some(error.into()),
            last_logsize: None,
            mtime: None,
            ts,
        }
    }

    /// Attaches log position metadata.
    #[must_use]
    pub const fn with_log_meta(mut self, last_logsize: u64, mtime: i32) -> Self {
        self.last_logsize = Some(last_logsize);
        self.mtime = Some(mtime);
        self
    }

    /// True for error results.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Destination of item results.
///
/// Writers are called from worker tasks and from the control loop, so they
/// must not block for long.
pub trait ResultWriter: Send + Sync {
    /// Accepts one result.
    fn write(&self, result: ItemResult);

    /// Pushes buffered results downstream.
    fn flush(&self) {}

    /// Free buffer slots; unbounded writers report `usize::MAX`.
    fn slots_available(&self) -> usize {
        usize::MAX
    }
}
