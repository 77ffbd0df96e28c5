//! Requesters of monitoring and their per-item/per-plugin bookkeeping.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::core::message::Request;
use crate::core::nextcheck::NextCheck;
use crate::core::output::ResultWriter;
use crate::core::plugin::{ItemMeta, WatchItem};
use crate::core::plugin_agent::PluginMap;
use crate::core::rules::{GlobalExpression, RuleBundle, SharedRules};
use crate::core::task::{
    ClientItem, ConfiguratorTask, DirectExporterTask, ExporterTask, Task, TaskId, TaskKind, TaskTable,
    WatcherTask,
};
use crate::core::SchedulerError;
use crate::util::clock::add_seconds;
use crate::util::hash::name_seed;
use crate::util::interval::parse_seconds;

/// Client of checks run by the agent itself.
pub const LOCAL_CHECKS_CLIENT_ID: u64 = 0;
/// Client of passive checks requested by the server.
pub const PASSIVE_CHECKS_CLIENT_ID: u64 = 1;
/// Highest reserved client id; larger ids are active-check servers.
pub const MAX_BUILTIN_CLIENT_ID: u64 = 100;

// Fixed clients keep plugins a day plus grace so once-a-day checks do not flap.
const BUILTIN_CLIENT_EXPIRY_SECS: i64 = 25 * 3600;

/// Hands out active-check client ids above the reserved range.
#[derive(Debug)]
pub struct ClientIdAllocator {
    last: AtomicU64,
}

impl Default for ClientIdAllocator {
    fn default() -> Self {
        Self {
            last: AtomicU64::new(MAX_BUILTIN_CLIENT_ID),
        }
    }
}

impl ClientIdAllocator {
    /// New allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused id.
    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Usage of one plugin by one client.
#[derive(Debug, Clone)]
pub struct PluginUsage {
    /// Last update that referenced the plugin.
    pub used: DateTime<Utc>,
    /// Watcher task collecting this update's items.
    pub watcher: Option<TaskId>,
}

/// Manager state a client works on while handling a request.
pub struct SchedulingContext<'a> {
    /// All plugin agents.
    pub plugins: &'a mut PluginMap,
    /// All tasks.
    pub tasks: &'a mut TaskTable,
    /// Delay calculator.
    pub next_check: &'a dyn NextCheck,
    /// Scheduler configuration.
    pub config: &'a SchedulerConfig,
}

/// Outcome of [`Client::cleanup`].
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Plugins this client stopped using.
    pub released: Vec<Arc<str>>,
    /// Plugins whose queue changed.
    pub touched: BTreeSet<Arc<str>>,
}

/// One source of monitoring requests.
pub struct Client {
    id: u64,
    exporters: HashMap<u64, TaskId>,
    plugins: HashMap<Arc<str>, PluginUsage>,
    rules: SharedRules,
    output: Arc<dyn ResultWriter>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("exporters", &self.exporters)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// New client writing to `output`.
    pub fn new(id: u64, output: Arc<dyn ResultWriter>) -> Self {
        Self {
            id,
            exporters: HashMap::new(),
            plugins: HashMap::new(),
            rules: Arc::new(ArcSwap::from_pointee(RuleBundle::default())),
            output,
        }
    }

    /// Client id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// True for active-check servers, false for the fixed clients.
    #[must_use]
    pub const fn is_active_checks(&self) -> bool {
        self.id > MAX_BUILTIN_CLIENT_ID
    }

    /// Result sink of the last update.
    #[must_use]
    pub fn output(&self) -> &Arc<dyn ResultWriter> {
        &self.output
    }

    /// Replaces the result sink.
    pub fn set_output(&mut self, output: Arc<dyn ResultWriter>) {
        self.output = output;
    }

    /// Published global expressions.
    #[must_use]
    pub fn rules(&self) -> Arc<RuleBundle> {
        self.rules.load_full()
    }

    /// Exporter task of an item.
    #[must_use]
    pub fn exporter_task(&self, itemid: u64) -> Option<TaskId> {
        self.exporters.get(&itemid).copied()
    }

    /// Number of tracked items.
    #[must_use]
    pub fn exporter_count(&self) -> usize {
        self.exporters.len()
    }

    /// Tracked `(itemid, task)` pairs.
    pub fn exporters(&self) -> impl Iterator<Item = (u64, TaskId)> + '_ {
        self.exporters.iter().map(|(item, task)| (*item, *task))
    }

    /// Stops tracking an item, returning its task.
    pub fn forget_item(&mut self, itemid: u64) -> Option<TaskId> {
        self.exporters.remove(&itemid)
    }

    /// Drops item entries whose task no longer exists or is inactive.
    pub fn retain_live_items(&mut self, tasks: &TaskTable) {
        self.exporters
            .retain(|_, id| tasks.get(*id).is_some_and(Task::is_active));
    }

    /// Usage entry of a plugin.
    #[must_use]
    pub fn plugin_usage(&self, plugin: &str) -> Option<&PluginUsage> {
        self.plugins.get(plugin)
    }

    /// Plugins the client uses.
    pub fn used_plugins(&self) -> impl Iterator<Item = &Arc<str>> {
        self.plugins.keys()
    }

    /// Number of plugins the client uses.
    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Records use of a plugin unless already recorded.
    pub fn touch_plugin(&mut self, plugin: &Arc<str>, used: DateTime<Utc>) {
        self.plugins
            .entry(Arc::clone(plugin))
            .or_insert(PluginUsage { used, watcher: None });
    }

    /// Drops usage entries of plugins that no longer exist.
    pub fn retain_plugins(&mut self, plugins: &PluginMap) {
        self.plugins.retain(|name, _| plugins.contains_key(name));
    }

    /// Publishes a new rule snapshot when the expressions changed.
    pub fn update_global_rules(&self, mut expressions: Vec<GlobalExpression>) {
        expressions.sort();
        if self.rules.load().same_expressions(&expressions) {
            return;
        }
        debug!(client = self.id, count = expressions.len(), "publish global regular expressions");
        self.rules.store(Arc::new(RuleBundle::new(expressions)));
    }

    /// Creates or updates the tasks `request` needs on `plugin`.
    ///
    /// # Errors
    ///
    /// Scheduling and validation failures; nothing is queued then.
    pub fn add_request(
        &mut self,
        ctx: &mut SchedulingContext<'_>,
        plugin: &Arc<str>,
        request: &Request,
        sink: &Arc<dyn ResultWriter>,
        now: DateTime<Utc>,
        first_active_refreshed: bool,
    ) -> Result<(), SchedulerError> {
        let (implementation, refcount, force_on_start) = {
            let agent = ctx
                .plugins
                .get(plugin)
                .ok_or_else(|| SchedulerError::UnknownMetric(request.key.clone()))?;
            (
                Arc::clone(agent.plugin()),
                agent.refcount(),
                agent.force_active_checks_on_start(),
            )
        };
        let timeout_secs = match &request.timeout {
            Some(text) => parse_seconds(text).map_err(|_| SchedulerError::InvalidTimeout(text.clone()))?,
            None => ctx.config.timeout_secs,
        };
        let first_use = !self.plugins.contains_key(plugin);
        let mut created: Vec<Task> = Vec::new();
        let mut new_watcher = None;

        if implementation.as_collector().is_some() && refcount == 0 {
            let mut task = Task::new(
                ctx.tasks.next_id(),
                Arc::clone(plugin),
                TaskKind::Collector { seed: name_seed(plugin) },
            );
            task.reschedule(now, implementation.as_ref(), ctx.next_check)?;
            created.push(task);
        }

        if implementation.as_exporter().is_some() {
            let item = ClientItem {
                itemid: request.itemid,
                key: request.key.clone(),
                delay: request.delay.clone(),
            };
            if self.is_active_checks() {
                if let Some(mut task) =
                    self.update_exporter(ctx, plugin, &item, request, sink, now, timeout_secs)?
                {
                    if !first_active_refreshed && force_on_start {
                        task.schedule_now(now);
                    } else {
                        task.reschedule(now, implementation.as_ref(), ctx.next_check)?;
                    }
                    self.exporters.insert(item.itemid, task.id());
                    created.push(task);
                }
            } else {
                let mut task = Task::new(
                    ctx.tasks.next_id(),
                    Arc::clone(plugin),
                    TaskKind::DirectExporter(DirectExporterTask::new(
                        item,
                        add_seconds(now, i64::try_from(timeout_secs).unwrap_or(i64::MAX)),
                        self.id,
                        Arc::clone(sink),
                        Arc::clone(&self.rules),
                        timeout_secs,
                    )),
                );
                task.reschedule(now, implementation.as_ref(), ctx.next_check)?;
                created.push(task);
            }
        }

        if implementation.as_runner().is_some() && refcount == 0 {
            let mut task = Task::new(ctx.tasks.next_id(), Arc::clone(plugin), TaskKind::Starter);
            task.reschedule(now, implementation.as_ref(), ctx.next_check)?;
            created.push(task);
        }

        if implementation.as_watcher().is_some() {
            let watch_item = WatchItem {
                itemid: request.itemid,
                key: request.key.clone(),
                delay: request.delay.clone(),
                last_logsize: request.last_logsize,
                mtime: request.mtime,
                timeout_secs,
            };
            let pending = self
                .plugins
                .get(plugin)
                .and_then(|usage| usage.watcher)
                .and_then(|id| ctx.tasks.get_mut(id));
            let mut watch_item = Some(watch_item);
            if let Some(TaskKind::Watcher(watcher)) = pending.map(Task::kind_mut) {
                watcher.requests.extend(watch_item.take());
            }
            if let Some(watch_item) = watch_item {
                let mut task = Task::new(
                    ctx.tasks.next_id(),
                    Arc::clone(plugin),
                    TaskKind::Watcher(WatcherTask {
                        requests: vec![watch_item],
                        client_id: self.id,
                        output: Arc::clone(sink),
                        rules: Arc::clone(&self.rules),
                    }),
                );
                task.reschedule(now, implementation.as_ref(), ctx.next_check)?;
                new_watcher = Some(task.id());
                created.push(task);
            }
        }

        if implementation.as_configurator().is_some() && refcount == 0 {
            let mut task = Task::new(
                ctx.tasks.next_id(),
                Arc::clone(plugin),
                TaskKind::Configurator(ConfiguratorTask {
                    global: ctx.config.global_options(),
                    options: ctx.config.plugin(plugin).and_then(|p| p.options.clone()),
                }),
            );
            task.reschedule(now, implementation.as_ref(), ctx.next_check)?;
            created.push(task);
        }

        let Some(agent) = ctx.plugins.get_mut(plugin) else {
            return Err(SchedulerError::UnknownMetric(request.key.clone()));
        };
        for task in created {
            debug!(
                plugin = %plugin,
                client = self.id,
                itemid = request.itemid,
                "created {} task {}",
                task.role(),
                task.id()
            );
            agent.push_task(task.id(), task.scheduled());
            ctx.tasks.insert(task);
        }
        if first_use && agent.acquire() {
            debug!(plugin = %plugin, client = self.id, "plugin activated");
        }
        let usage = self
            .plugins
            .entry(Arc::clone(plugin))
            .or_insert(PluginUsage { used: now, watcher: None });
        usage.used = now;
        if new_watcher.is_some() {
            usage.watcher = new_watcher;
        }
        Ok(())
    }

    // Updates the item's existing exporter in place, or returns a new one to queue.
    #[allow(clippy::too_many_arguments)]
    fn update_exporter(
        &mut self,
        ctx: &mut SchedulingContext<'_>,
        plugin: &Arc<str>,
        item: &ClientItem,
        request: &Request,
        sink: &Arc<dyn ResultWriter>,
        now: DateTime<Utc>,
        timeout_secs: u64,
    ) -> Result<Option<Task>, SchedulerError> {
        ctx.next_check.next_check(item.itemid, &item.delay, now)?;

        let mut existing = self
            .exporters
            .get(&item.itemid)
            .copied()
            .filter(|id| ctx.tasks.get(*id).is_some_and(Task::is_active));
        if let Some(id) = existing {
            let (updated, owner) = match ctx.tasks.get(id).map(|t| (t.kind(), t.plugin())) {
                Some((TaskKind::Exporter(task), owner)) => (task.updated, Arc::clone(owner)),
                _ => (DateTime::<Utc>::UNIX_EPOCH, Arc::clone(plugin)),
            };
            if updated == now {
                return Err(SchedulerError::DuplicateItem(item.itemid));
            }
            if owner != *plugin {
                debug!(itemid = item.itemid, from = %owner, to = %plugin, "item moved to another plugin");
                ctx.tasks.deactivate(id, ctx.plugins);
                self.exporters.remove(&item.itemid);
                existing = None;
            }
        }

        let meta = |request: &Request| {
            ItemMeta::new(request.last_logsize.unwrap_or(0), request.mtime.unwrap_or(0))
        };

        let Some(id) = existing else {
            return Ok(Some(Task::new(
                ctx.tasks.next_id(),
                Arc::clone(plugin),
                TaskKind::Exporter(ExporterTask {
                    item: item.clone(),
                    updated: now,
                    client_id: self.id,
                    output: Arc::clone(sink),
                    meta: Arc::new(meta(request)),
                    rules: Arc::clone(&self.rules),
                    timeout_secs,
                }),
            )));
        };

        let plugin_impl = ctx.plugins.get(plugin).map(|agent| Arc::clone(agent.plugin()));
        let Some(task) = ctx.tasks.get_mut(id) else {
            return Ok(None);
        };
        let mut delay_changed = false;
        if let TaskKind::Exporter(exporter) = task.kind_mut() {
            exporter.updated = now;
            exporter.item.key.clone_from(&item.key);
            exporter.output = Arc::clone(sink);
            exporter.timeout_secs = timeout_secs;
            if let Some(size) = request.last_logsize {
                exporter.meta.set_last_logsize(size);
            }
            if let Some(mtime) = request.mtime {
                exporter.meta.set_mtime(mtime);
            }
            if exporter.item.delay != item.delay {
                exporter.item.delay.clone_from(&item.delay);
                delay_changed = true;
            }
        }
        if delay_changed {
            if let Some(plugin_impl) = plugin_impl {
                task.reschedule(now, plugin_impl.as_ref(), ctx.next_check)?;
                let scheduled = task.scheduled();
                if let Some(agent) = ctx.plugins.get_mut(plugin) {
                    agent.update_task(id, scheduled);
                }
            }
        }
        Ok(None)
    }

    /// Releases what the latest update no longer references.
    ///
    /// Exporters not refreshed by the update at `now` are deactivated. Plugins
    /// unused since the expiry horizon (now for active-check servers, 25 hours
    /// back for the fixed clients) are released, watchers getting one final
    /// empty watch first.
    pub fn cleanup(&mut self, ctx: &mut SchedulingContext<'_>, now: DateTime<Utc>) -> CleanupReport {
        let mut report = CleanupReport::default();
        for usage in self.plugins.values_mut() {
            usage.watcher = None;
        }

        let stale: Vec<u64> = self
            .exporters
            .iter()
            .filter(|(_, id)| match ctx.tasks.get(**id).map(Task::kind) {
                Some(TaskKind::Exporter(task)) => task.updated < now,
                _ => true,
            })
            .map(|(itemid, _)| *itemid)
            .collect();
        for itemid in stale {
            if let Some(id) = self.exporters.remove(&itemid) {
                if let Some(plugin) = ctx.tasks.deactivate(id, ctx.plugins) {
                    report.touched.insert(plugin);
                }
            }
        }

        let expiry = if self.is_active_checks() {
            now
        } else {
            add_seconds(now, -BUILTIN_CLIENT_EXPIRY_SECS)
        };
        let mut expired: Vec<Arc<str>> = self
            .plugins
            .iter()
            .filter(|(_, usage)| usage.used < expiry)
            .map(|(name, _)| Arc::clone(name))
            .collect();
        expired.sort();

        for name in expired {
            self.plugins.remove(&name);
            let Some(agent) = ctx.plugins.get_mut(&name) else {
                continue;
            };
            if agent.plugin().as_watcher().is_some() {
                let mut task = Task::new(
                    ctx.tasks.next_id(),
                    Arc::clone(&name),
                    TaskKind::Watcher(WatcherTask {
                        requests: Vec::new(),
                        client_id: self.id,
                        output: Arc::clone(&self.output),
                        rules: Arc::clone(&self.rules),
                    }),
                );
                task.schedule_now(now);
                agent.push_task(task.id(), task.scheduled());
                ctx.tasks.insert(task);
            }
            agent.release_usage();
            debug!(plugin = %name, client = self.id, "released plugin");
            report.touched.insert(Arc::clone(&name));
            report.released.push(name);
        }
        report
    }
}
