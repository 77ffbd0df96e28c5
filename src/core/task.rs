//! Schedulable units of plugin work.
//!
//! Every task belongs to exactly one plugin agent and lives in the manager's
//! [`TaskTable`]. Queues and clients refer to tasks by [`TaskId`], so a task can
//! be moved between queues, dispatched and reported back without shared
//! ownership.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::GlobalOptions;
use crate::core::executor::TaskJob;
use crate::core::nextcheck::NextCheck;
use crate::core::output::{ItemResult, ResultWriter};
use crate::core::plugin::{ExportValue, ItemMeta, Plugin, TaskContext, WatchItem};
use crate::core::plugin_agent::PluginMap;
use crate::core::rules::SharedRules;
use crate::core::SchedulerError;
use crate::util::clock::{self, at_second};
use crate::util::itemkey::{key_name, parse_key};

/// Identifier of a task, unique for the lifetime of a manager.
pub type TaskId = u64;

/// Sub-second offset of configurator tasks.
pub const PRIORITY_CONFIGURATOR_NS: u32 = 0;
/// Sub-second offset of starter tasks.
pub const PRIORITY_STARTER_NS: u32 = 1;
/// Sub-second offset of sampling collector tasks.
pub const PRIORITY_COLLECTOR_NS: u32 = 2;
/// Sub-second offset of watcher tasks.
pub const PRIORITY_WATCHER_NS: u32 = 3;
/// Sub-second offset of exporter tasks.
pub const PRIORITY_EXPORTER_NS: u32 = 4;
/// Sub-second offset of stopper tasks.
pub const PRIORITY_STOPPER_NS: u32 = 5;

/// Role a task plays for its plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskRole {
    /// Periodic sampling.
    Collector,
    /// Recurring per-item export.
    Exporter,
    /// One-shot export with a deadline.
    DirectExporter,
    /// Lifecycle start.
    Starter,
    /// Lifecycle stop.
    Stopper,
    /// Batched watch.
    Watcher,
    /// Configuration apply.
    Configurator,
}

impl TaskRole {
    /// Tie-break offset within a second; lower runs first.
    #[must_use]
    pub const fn priority_ns(self) -> u32 {
        match self {
            Self::Configurator => PRIORITY_CONFIGURATOR_NS,
            Self::Starter => PRIORITY_STARTER_NS,
            Self::Collector => PRIORITY_COLLECTOR_NS,
            Self::Watcher => PRIORITY_WATCHER_NS,
            Self::Exporter | Self::DirectExporter => PRIORITY_EXPORTER_NS,
            Self::Stopper => PRIORITY_STOPPER_NS,
        }
    }

    /// Role name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collector => "collector",
            Self::Exporter => "exporter",
            Self::DirectExporter => "direct exporter",
            Self::Starter => "starter",
            Self::Stopper => "stopper",
            Self::Watcher => "watcher",
            Self::Configurator => "configurator",
        }
    }
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item identity as last requested by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientItem {
    /// Item identifier.
    pub itemid: u64,
    /// Item key, after alias resolution.
    pub key: String,
    /// Delay specification.
    pub delay: String,
}

/// Recurring export of one client item.
pub struct ExporterTask {
    /// Item being exported.
    pub item: ClientItem,
    /// Last update batch that contained the item.
    pub updated: DateTime<Utc>,
    /// Owning client.
    pub client_id: u64,
    /// Result sink.
    pub output: Arc<dyn ResultWriter>,
    /// Log position metadata.
    pub meta: Arc<ItemMeta>,
    /// Client's global expressions.
    pub rules: SharedRules,
    /// Check timeout in seconds.
    pub timeout_secs: u64,
}

/// One-shot export that expires at a deadline.
pub struct DirectExporterTask {
    /// Item being exported.
    pub item: ClientItem,
    /// Deadline after which "no data" is reported.
    pub expire: DateTime<Utc>,
    /// Set once a result was delivered.
    pub done: bool,
    /// Owning client.
    pub client_id: u64,
    /// Result sink.
    pub output: Arc<dyn ResultWriter>,
    /// Client's global expressions.
    pub rules: SharedRules,
    /// Check timeout in seconds.
    pub timeout_secs: u64,
    rescheduled: bool,
}

impl DirectExporterTask {
    /// One-shot export of `item` expiring at `expire`.
    pub fn new(
        item: ClientItem,
        expire: DateTime<Utc>,
        client_id: u64,
        output: Arc<dyn ResultWriter>,
        rules: SharedRules,
        timeout_secs: u64,
    ) -> Self {
        Self {
            item,
            expire,
            done: false,
            client_id,
            output,
            rules,
            timeout_secs,
            rescheduled: false,
        }
    }
}

/// Batched watch of all items a client has for a plugin.
pub struct WatcherTask {
    /// Accumulated items, empty to release the client.
    pub requests: Vec<WatchItem>,
    /// Owning client.
    pub client_id: u64,
    /// Result sink.
    pub output: Arc<dyn ResultWriter>,
    /// Client's global expressions.
    pub rules: SharedRules,
}

/// Configuration handed to a configurator.
#[derive(Debug, Clone)]
pub struct ConfiguratorTask {
    /// Agent-wide options.
    pub global: GlobalOptions,
    /// Plugin specific options.
    pub options: Option<serde_json::Value>,
}

/// Role specific payload of a task.
pub enum TaskKind {
    /// Periodic sampling; `seed` spreads plugins over the period.
    Collector {
        /// Hash of the plugin name.
        seed: u32,
    },
    /// Recurring per-item export.
    Exporter(ExporterTask),
    /// One-shot export.
    DirectExporter(DirectExporterTask),
    /// Lifecycle start.
    Starter,
    /// Lifecycle stop.
    Stopper,
    /// Batched watch.
    Watcher(WatcherTask),
    /// Configuration apply.
    Configurator(ConfiguratorTask),
}

impl TaskKind {
    /// Role of this payload.
    #[must_use]
    pub const fn role(&self) -> TaskRole {
        match self {
            Self::Collector { .. } => TaskRole::Collector,
            Self::Exporter(_) => TaskRole::Exporter,
            Self::DirectExporter(_) => TaskRole::DirectExporter,
            Self::Starter => TaskRole::Starter,
            Self::Stopper => TaskRole::Stopper,
            Self::Watcher(_) => TaskRole::Watcher,
            Self::Configurator(_) => TaskRole::Configurator,
        }
    }
}

/// A schedulable action of one plugin.
pub struct Task {
    id: TaskId,
    plugin: Arc<str>,
    scheduled: DateTime<Utc>,
    active: bool,
    reserved: Option<u32>,
    kind: TaskKind,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("plugin", &self.plugin)
            .field("role", &self.role())
            .field("scheduled", &self.scheduled)
            .field("active", &self.active)
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// New active, unscheduled task.
    #[must_use]
    pub fn new(id: TaskId, plugin: Arc<str>, kind: TaskKind) -> Self {
        Self {
            id,
            plugin,
            scheduled: DateTime::<Utc>::UNIX_EPOCH,
            active: true,
            reserved: None,
            kind,
        }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Owning plugin name.
    #[must_use]
    pub const fn plugin(&self) -> &Arc<str> {
        &self.plugin
    }

    /// Moves the task to another plugin (user-parameter reload).
    pub fn set_plugin(&mut self, plugin: Arc<str>) {
        self.plugin = plugin;
    }

    /// Role of the task.
    #[must_use]
    pub const fn role(&self) -> TaskRole {
        self.kind.role()
    }

    /// Role payload.
    #[must_use]
    pub const fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Mutable role payload.
    pub fn kind_mut(&mut self) -> &mut TaskKind {
        &mut self.kind
    }

    /// Next run instant.
    #[must_use]
    pub const fn scheduled(&self) -> DateTime<Utc> {
        self.scheduled
    }

    /// False once deactivated.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Marks the task inactive; it will not be rescheduled again.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// True while dispatched to a worker.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.reserved.is_some()
    }

    /// Capacity reserved for the running task.
    #[must_use]
    pub const fn reserved(&self) -> Option<u32> {
        self.reserved
    }

    /// Records the reservation made at dispatch.
    pub fn set_reserved(&mut self, weight: u32) {
        self.reserved = Some(weight);
    }

    /// Clears the reservation, returning it.
    pub fn take_reserved(&mut self) -> Option<u32> {
        self.reserved.take()
    }

    /// Capacity the task takes from its plugin while running.
    ///
    /// Exports share the plugin; every other role needs all of it.
    #[must_use]
    pub const fn weight(&self, max_capacity: u32) -> u32 {
        match self.kind {
            TaskKind::Exporter(_) | TaskKind::DirectExporter(_) => 1,
            _ => max_capacity,
        }
    }

    /// True when the task is put back into the queue after running.
    #[must_use]
    pub const fn is_recurring(&self) -> bool {
        match &self.kind {
            TaskKind::Collector { .. } | TaskKind::Exporter(_) => true,
            TaskKind::DirectExporter(task) => !task.done,
            _ => false,
        }
    }

    /// True for export tasks whose key name equals `key`.
    #[must_use]
    pub fn matches_item_key(&self, key: &str) -> bool {
        self.item().is_some_and(|item| key_name(&item.key) == key)
    }

    /// Item of export tasks.
    #[must_use]
    pub const fn item(&self) -> Option<&ClientItem> {
        match &self.kind {
            TaskKind::Exporter(task) => Some(&task.item),
            TaskKind::DirectExporter(task) => Some(&task.item),
            _ => None,
        }
    }

    /// Schedules the task for the second of `now`.
    pub fn schedule_now(&mut self, now: DateTime<Utc>) {
        self.scheduled = at_second(now.timestamp(), self.role().priority_ns());
    }

    /// Computes the next run instant after `now`.
    ///
    /// # Errors
    ///
    /// Fails for unusable collector periods or item delays, and with
    /// [`SchedulerError::NoData`] once a one-shot export is past its deadline
    /// (the "no data" result has then already been delivered).
    pub fn reschedule(
        &mut self,
        now: DateTime<Utc>,
        plugin: &dyn Plugin,
        next_check: &dyn NextCheck,
    ) -> Result<(), SchedulerError> {
        let priority = self.role().priority_ns();
        let seconds = now.timestamp();
        let next = match &mut self.kind {
            TaskKind::Collector { seed } => {
                let period = plugin.as_collector().map_or(0, |c| c.period());
                if period == 0 {
                    return Err(SchedulerError::InvalidPeriod(period));
                }
                let period = i64::from(period);
                let mut next = period * seconds.div_euclid(period) + i64::from(*seed) % period;
                while next <= seconds {
                    next += period;
                }
                next
            }
            TaskKind::Exporter(task) => next_check
                .next_check(task.item.itemid, &task.item.delay, now)?
                .0
                .timestamp(),
            TaskKind::DirectExporter(task) => {
                if now > task.expire {
                    if !task.done {
                        task.done = true;
                        task.output
                            .write(ItemResult::error(task.item.itemid, SchedulerError::NoData.to_string(), now));
                    }
                    return Err(SchedulerError::NoData);
                }
                if task.rescheduled {
                    seconds + 1
                } else {
                    task.rescheduled = true;
                    seconds
                }
            }
            TaskKind::Starter | TaskKind::Stopper | TaskKind::Watcher(_) | TaskKind::Configurator(_) => seconds,
        };
        self.scheduled = at_second(next, priority);
        Ok(())
    }

    /// Delivers "no data" and finishes a one-shot export found past its
    /// deadline. Returns true when that happened.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        let TaskKind::DirectExporter(task) = &mut self.kind else {
            return false;
        };
        if task.done || now <= task.expire {
            return false;
        }
        task.done = true;
        task.output
            .write(ItemResult::error(task.item.itemid, SchedulerError::NoData.to_string(), now));
        true
    }

    /// Builds the job a worker runs for this task.
    #[must_use]
    pub fn perform(&self, plugin: Arc<dyn Plugin>) -> TaskJob {
        let name = Arc::clone(&self.plugin);
        match &self.kind {
            TaskKind::Collector { .. } => Box::pin(async move {
                if let Some(collector) = plugin.as_collector() {
                    if let Err(err) = collector.collect().await {
                        warn!("plugin '{}': collector failed: {}", name, err);
                    }
                }
                false
            }),
            TaskKind::Exporter(task) => {
                let ctx = TaskContext::new(task.client_id, Arc::clone(&task.output), Arc::clone(&task.rules))
                    .with_item(task.item.itemid, task.item.delay.clone())
                    .with_timeout(Duration::from_secs(task.timeout_secs))
                    .with_meta(Arc::clone(&task.meta));
                Box::pin(export(plugin, name, task.item.key.clone(), ctx))
            }
            TaskKind::DirectExporter(task) => {
                let ctx = TaskContext::new(task.client_id, Arc::clone(&task.output), Arc::clone(&task.rules))
                    .with_item(task.item.itemid, task.item.delay.clone())
                    .with_timeout(Duration::from_secs(task.timeout_secs));
                Box::pin(export(plugin, name, task.item.key.clone(), ctx))
            }
            TaskKind::Starter => Box::pin(async move {
                if let Some(runner) = plugin.as_runner() {
                    debug!("plugin '{}': start", name);
                    runner.start().await;
                }
                false
            }),
            TaskKind::Stopper => Box::pin(async move {
                if let Some(runner) = plugin.as_runner() {
                    debug!("plugin '{}': stop", name);
                    runner.stop().await;
                }
                false
            }),
            TaskKind::Watcher(task) => {
                let items = task.requests.clone();
                let ctx = TaskContext::new(task.client_id, Arc::clone(&task.output), Arc::clone(&task.rules));
                Box::pin(async move {
                    if let Some(watcher) = plugin.as_watcher() {
                        watcher.watch(&items, &ctx).await;
                    }
                    false
                })
            }
            TaskKind::Configurator(task) => {
                let global = task.global.clone();
                let options = task.options.clone();
                Box::pin(async move {
                    if let Some(configurator) = plugin.as_configurator() {
                        configurator.configure(&global, options.as_ref()).await;
                    }
                    false
                })
            }
        }
    }
}

async fn export(plugin: Arc<dyn Plugin>, name: Arc<str>, key: String, ctx: TaskContext) -> bool {
    let Some(exporter) = plugin.as_exporter() else {
        return false;
    };
    let itemid = ctx.item_id();
    let (bare, params) = match parse_key(&key) {
        Ok(parsed) => parsed,
        Err(err) => {
            ctx.output().write(ItemResult::error(itemid, err.to_string(), clock::now()));
            return true;
        }
    };
    match exporter.export(&bare, &params, &ctx).await {
        Ok(Some(value)) => write_values(&ctx, itemid, value, clock::now()) > 0,
        Ok(None) => false,
        Err(err) => {
            debug!(plugin = %name, itemid, "check '{}' failed: {}", key, err);
            ctx.output().write(ItemResult::error(itemid, err.to_string(), clock::now()));
            true
        }
    }
}

fn write_values(ctx: &TaskContext, itemid: u64, value: ExportValue, ts: DateTime<Utc>) -> usize {
    match value {
        ExportValue::Many(values) => values
            .into_iter()
            .map(|v| write_values(ctx, itemid, v, ts))
            .sum(),
        value => {
            let mut result = ItemResult::value(itemid, value.to_string(), ts);
            if let Some(meta) = ctx.meta() {
                result = result.with_log_meta(meta.last_logsize(), meta.mtime());
            }
            ctx.output().write(result);
            1
        }
    }
}

/// Owner of every live task.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: HashMap<TaskId, Task>,
    last_id: TaskId,
}

impl TaskTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh task identifier.
    pub fn next_id(&mut self) -> TaskId {
        self.last_id += 1;
        self.last_id
    }

    /// Stores a task.
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    /// Task by id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Mutable task by id.
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Drops a task.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    /// True when the task exists.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Number of live tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All live tasks.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// All live tasks, mutable.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    /// Takes a task out of its plugin queue and marks it inactive.
    ///
    /// Idle tasks are dropped at once; running ones are dropped when their
    /// completion arrives. Returns the plugin whose queue changed.
    pub fn deactivate(&mut self, id: TaskId, plugins: &mut PluginMap) -> Option<Arc<str>> {
        let task = self.tasks.get_mut(&id)?;
        task.deactivate();
        let plugin = Arc::clone(&task.plugin);
        let running = task.is_running();
        debug!(plugin = %plugin, task = id, role = %task.role(), "deactivate task");
        if let Some(agent) = plugins.get_mut(&plugin) {
            agent.remove_task(id);
        }
        if !running {
            self.tasks.remove(&id);
        }
        Some(plugin)
    }
}
