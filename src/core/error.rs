//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::plugin::PluginError;

/// Errors produced by scheduler components.
///
/// The display text is what an item's error result carries back to the
/// requester, so it stays stable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// No registered plugin serves the key.
    #[error("Unknown metric {0}")]
    UnknownMetric(String),
    /// Item key could not be parsed.
    #[error("Invalid item key format: {0}")]
    InvalidKey(String),
    /// Key refused by the access rules.
    #[error("Unknown metric {0}")]
    AccessDenied(String),
    /// Item delay could not be interpreted.
    #[error("invalid delay \"{delay}\": {reason}")]
    InvalidDelay {
        /// Offending delay text.
        delay: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Sampling collector reported a zero or unusable period.
    #[error("invalid collector interval {0} seconds")]
    InvalidPeriod(u32),
    /// Item timeout could not be interpreted.
    #[error("invalid timeout \"{0}\"")]
    InvalidTimeout(String),
    /// The same item was scheduled twice within one second.
    #[error("duplicate itemid {0} found")]
    DuplicateItem(u64),
    /// One-shot check did not produce a value before its deadline.
    #[error("Timeout occurred while gathering data.")]
    NoData,
    /// Request arrived while the scheduler was draining.
    #[error("Cannot obtain item value during shutdown process.")]
    ShuttingDown,
    /// Caller gave up waiting for a result.
    #[error("timed out waiting for result")]
    Timeout,
    /// The control loop is gone.
    #[error("scheduler is not running")]
    Stopped,
    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Check finished with an error result.
    #[error("{0}")]
    Check(String),
    /// Unsupported administrative query.
    #[error("unknown request \"{0}\"")]
    UnknownQuery(String),
    /// Metric key registered by more than one plugin.
    #[error("metric \"{metric}\" already registered by plugin \"{plugin}\"")]
    DuplicateMetric {
        /// Metric key.
        metric: String,
        /// Plugin that owns it already.
        plugin: String,
    },
    /// Pattern refers to a global expression the server never sent.
    #[error("unknown global regular expression \"{0}\"")]
    UnknownRule(String),
    /// Plugin failure surfaced through the scheduler.
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
