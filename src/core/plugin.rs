//! Plugin capability traits and the context handed to running checks.
//!
//! A plugin implements [`Plugin`] and exposes any subset of the capability
//! roles through the `as_*` accessors. The scheduler only ever calls a role
//! from a dispatched worker, never from its control loop.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GlobalOptions;
use crate::core::output::ResultWriter;
use crate::core::rules::{RuleBundle, SharedRules};
use crate::core::SchedulerError;

/// Errors reported by plugin implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    /// Check failed; the text is delivered as the item's error.
    #[error("{0}")]
    Failed(String),
    /// The plugin does not know the requested key.
    #[error("Unsupported item key.")]
    UnsupportedMetric,
    /// Key parameters rejected.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    /// Plugin options rejected.
    #[error("invalid plugin configuration: {0}")]
    Config(String),
}

/// Value produced by an export call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportValue {
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Several values for the same item (log-like checks).
    Many(Vec<ExportValue>),
}

impl fmt::Display for ExportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.6}"),
            Self::Many(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<String> for ExportValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ExportValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for ExportValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ExportValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Log position metadata of an item, shared with running checks.
#[derive(Debug, Default)]
pub struct ItemMeta {
    last_logsize: AtomicU64,
    mtime: AtomicI32,
}

impl ItemMeta {
    /// New metadata with the given starting position.
    #[must_use]
    pub fn new(last_logsize: u64, mtime: i32) -> Self {
        Self {
            last_logsize: AtomicU64::new(last_logsize),
            mtime: AtomicI32::new(mtime),
        }
    }

    /// Last processed log size.
    #[must_use]
    pub fn last_logsize(&self) -> u64 {
        self.last_logsize.load(Ordering::Acquire)
    }

    /// Updates the last processed log size.
    pub fn set_last_logsize(&self, value: u64) {
        self.last_logsize.store(value, Ordering::Release);
    }

    /// Last seen modification time.
    #[must_use]
    pub fn mtime(&self) -> i32 {
        self.mtime.load(Ordering::Acquire)
    }

    /// Updates the last seen modification time.
    pub fn set_mtime(&self, value: i32) {
        self.mtime.store(value, Ordering::Release);
    }
}

/// One item handed to a watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchItem {
    /// Item identifier.
    pub itemid: u64,
    /// Full item key.
    pub key: String,
    /// Delay specification.
    pub delay: String,
    /// Last processed log size, if the server sent one.
    pub last_logsize: Option<u64>,
    /// Last seen modification time, if the server sent one.
    pub mtime: Option<i32>,
    /// Item timeout in seconds.
    pub timeout_secs: u64,
}

/// Per-call context given to exporters and watchers.
#[derive(Clone)]
pub struct TaskContext {
    client_id: u64,
    item_id: u64,
    delay: String,
    timeout: Duration,
    output: Arc<dyn ResultWriter>,
    meta: Option<Arc<ItemMeta>>,
    rules: SharedRules,
}

impl TaskContext {
    /// Context for a client without item binding.
    pub fn new(client_id: u64, output: Arc<dyn ResultWriter>, rules: SharedRules) -> Self {
        Self {
            client_id,
            item_id: 0,
            delay: String::new(),
            timeout: Duration::from_secs(3),
            output,
            meta: None,
            rules,
        }
    }

    /// Binds the context to an item.
    #[must_use]
    pub fn with_item(mut self, item_id: u64, delay: impl Into<String>) -> Self {
        self.item_id = item_id;
        self.delay = delay.into();
        self
    }

    /// Sets the check timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attaches item log metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: Arc<ItemMeta>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Requesting client.
    #[must_use]
    pub const fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Item being checked, 0 when unbound.
    #[must_use]
    pub const fn item_id(&self) -> u64 {
        self.item_id
    }

    /// Delay specification of the item.
    #[must_use]
    pub fn delay(&self) -> &str {
        &self.delay
    }

    /// Time budget of the check.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sink for results produced outside the normal return path.
    #[must_use]
    pub fn output(&self) -> &Arc<dyn ResultWriter> {
        &self.output
    }

    /// Item log metadata, when bound to a recurring item.
    #[must_use]
    pub fn meta(&self) -> Option<&ItemMeta> {
        self.meta.as_deref()
    }

    /// Currently published global expression snapshot.
    #[must_use]
    pub fn global_rules(&self) -> Arc<RuleBundle> {
        self.rules.load_full()
    }

    /// Matches `value` against a regular expression or `@name` global expression.
    ///
    /// # Errors
    ///
    /// Fails for invalid regular expressions and unknown global expressions.
    pub fn matches(&self, value: &str, pattern: &str, case_sensitive: bool) -> Result<bool, SchedulerError> {
        self.rules.load().matches(value, pattern, case_sensitive)
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("client_id", &self.client_id)
            .field("item_id", &self.item_id)
            .field("delay", &self.delay)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Base trait every plugin implements.
pub trait Plugin: Send + Sync {
    /// Plugin name, unique within the agent.
    fn name(&self) -> &str;

    /// Sampling collector role.
    fn as_collector(&self) -> Option<&dyn Collector> {
        None
    }

    /// Per-item exporter role.
    fn as_exporter(&self) -> Option<&dyn Exporter> {
        None
    }

    /// Start/stop lifecycle role.
    fn as_runner(&self) -> Option<&dyn Runner> {
        None
    }

    /// Batched watcher role.
    fn as_watcher(&self) -> Option<&dyn Watcher> {
        None
    }

    /// Configuration role.
    fn as_configurator(&self) -> Option<&dyn Configurator> {
        None
    }
}

/// Periodic sampling independent of items.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Takes one sample.
    async fn collect(&self) -> Result<(), PluginError>;

    /// Sampling period in seconds.
    fn period(&self) -> u32;
}

/// Computes item values on request.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Returns the value for `key` with `params`, `None` when there is nothing to report.
    async fn export(
        &self,
        key: &str,
        params: &[String],
        ctx: &TaskContext,
    ) -> Result<Option<ExportValue>, PluginError>;
}

/// Plugin with background activity between `start` and `stop`.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Called once when the first client starts using the plugin.
    async fn start(&self);

    /// Called once when the last client releases the plugin.
    async fn stop(&self);
}

/// Receives the whole item set of a client in one call.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Replaces the watched items; an empty slice releases the client.
    async fn watch(&self, items: &[WatchItem], ctx: &TaskContext);
}

/// Plugin accepting configuration.
#[async_trait]
pub trait Configurator: Send + Sync {
    /// Applies configuration.
    async fn configure(&self, global: &GlobalOptions, options: Option<&serde_json::Value>);

    /// Checks configuration before the scheduler is built.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid option.
    fn validate(&self, options: Option<&serde_json::Value>) -> Result<(), PluginError>;
}
