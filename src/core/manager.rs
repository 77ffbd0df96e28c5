//! The scheduler control loop.
//!
//! A [`Manager`] owns every plugin agent, client and task. It is driven by a
//! one second tick, a periodic passive-client sweep and its mailbox; all
//! state changes happen on the loop, workers only ever talk back through
//! [`Message::Finished`].
//!
//! Plugins wait in a global queue ordered by the run instant of their head
//! task. A plugin is only queued while it has tasks, and it is left out of the
//! queue while its head task does not fit its free capacity; completions put
//! it back.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{get_plugin_capacity, get_plugin_force_active_checks, SchedulerConfig};
use crate::core::client::{
    Client, SchedulingContext, LOCAL_CHECKS_CLIENT_ID, MAX_BUILTIN_CLIENT_ID, PASSIVE_CHECKS_CLIENT_ID,
};
use crate::core::executor::{Completion, Spawn};
use crate::core::heap::IndexedHeap;
use crate::core::message::{Message, Query, Request, UpdateRequest};
use crate::core::nextcheck::NextCheck;
use crate::core::output::ItemResult;
use crate::core::plugin_agent::{PluginAgent, PluginMap};
use crate::core::query;
use crate::core::registry::PluginRegistration;
use crate::core::task::{Task, TaskId, TaskKind, TaskTable};
use crate::core::SchedulerError;
use crate::util::alias::AliasManager;
use crate::util::clock;
use crate::util::itemkey::{key_name, parse_key};
use crate::util::keyaccess::AccessRules;

/// Lifecycle of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Built, loop not started.
    Initializing,
    /// Accepting requests.
    Running,
    /// Shutdown requested; waiting for running tasks.
    Draining,
    /// Loop exited.
    Stopped,
}

/// Whether the loop keeps going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep running.
    Continue,
    /// Leave the loop.
    Stop,
}

/// Plugin scheduler.
pub struct Manager<S> {
    config: Arc<SchedulerConfig>,
    plugins: PluginMap,
    metrics: HashMap<String, Arc<str>>,
    plugin_queue: IndexedHeap<Arc<str>, DateTime<Utc>>,
    clients: HashMap<u64, Client>,
    tasks: TaskTable,
    aliases: AliasManager,
    access: AccessRules,
    next_check: Arc<dyn NextCheck>,
    spawner: S,
    tx: mpsc::Sender<Message>,
    rx: Option<mpsc::Receiver<Message>>,
    active_tasks: usize,
    state: ManagerState,
    last_tick: Option<DateTime<Utc>>,
    shutdown_countdown: u32,
}

impl<S> std::fmt::Debug for Manager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("state", &self.state)
            .field("plugins", &self.plugins.len())
            .field("clients", &self.clients.len())
            .field("tasks", &self.tasks.len())
            .field("queued_plugins", &self.plugin_queue.len())
            .field("active_tasks", &self.active_tasks)
            .finish_non_exhaustive()
    }
}

// Resolves capacity and flags of a registration against the configuration.
fn build_agent(config: &SchedulerConfig, registration: &PluginRegistration) -> Result<PluginAgent, SchedulerError> {
    let name = registration.name();
    let options = config.plugin(name);
    if let Some(configurator) = registration.plugin.as_configurator() {
        configurator
            .validate(options.and_then(|o| o.options.as_ref()))
            .map_err(|e| SchedulerError::Config(format!("invalid plugin {name} configuration: {e}")))?;
    }
    let capacity = get_plugin_capacity(
        options.and_then(|o| o.system.capacity).unwrap_or(0),
        config.default_capacity,
        registration.max_capacity,
        config.default_max_capacity,
        name,
    );
    let force = get_plugin_force_active_checks(
        options.and_then(|o| o.system.force_active_checks_on_start),
        config.force_active_checks_on_start,
    );
    Ok(PluginAgent::new(
        Arc::clone(&registration.plugin),
        registration.metrics.clone(),
        capacity,
        registration.user_parameter,
        force,
    ))
}

/// Maps a request to the plugin serving it, resolving aliases and applying
/// key access rules.
///
/// # Errors
///
/// Malformed keys, metrics nobody serves and keys denied to remote clients.
pub fn resolve_request(
    aliases: &AliasManager,
    access: &AccessRules,
    metrics: &HashMap<String, Arc<str>>,
    client_id: u64,
    request: &Request,
) -> Result<(Arc<str>, Request), SchedulerError> {
    let key = aliases.resolve(&request.key);
    let (name, _) = parse_key(&key)?;
    let plugin = metrics
        .get(&name)
        .cloned()
        .ok_or_else(|| SchedulerError::UnknownMetric(name.clone()))?;
    if client_id != LOCAL_CHECKS_CLIENT_ID && !access.check(&key) {
        return Err(SchedulerError::AccessDenied(name));
    }
    let mut resolved = request.clone();
    resolved.key = key;
    Ok((plugin, resolved))
}

impl<S: Spawn> Manager<S> {
    /// Builds a manager over `registrations`.
    ///
    /// # Errors
    ///
    /// Invalid aliases, access rules, plugin configuration, or metrics served
    /// by more than one plugin.
    pub fn new(
        config: SchedulerConfig,
        registrations: Vec<PluginRegistration>,
        spawner: S,
        next_check: Arc<dyn NextCheck>,
    ) -> Result<Self, SchedulerError> {
        let aliases = AliasManager::new(&config.aliases)?;
        let access = AccessRules::new(&config.key_access)?;
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let mut manager = Self {
            config: Arc::new(config),
            plugins: PluginMap::new(),
            metrics: HashMap::new(),
            plugin_queue: IndexedHeap::new(),
            clients: HashMap::new(),
            tasks: TaskTable::new(),
            aliases,
            access,
            next_check,
            spawner,
            tx,
            rx: Some(rx),
            active_tasks: 0,
            state: ManagerState::Initializing,
            last_tick: None,
            shutdown_countdown: 0,
        };
        for registration in &registrations {
            let agent = build_agent(&manager.config, registration)?;
            manager.add_agent(agent)?;
        }
        info!(
            plugins = manager.plugins.len(),
            aliases = manager.aliases.len(),
            "scheduler initialized"
        );
        Ok(manager)
    }

    fn add_agent(&mut self, agent: PluginAgent) -> Result<(), SchedulerError> {
        let name = Arc::clone(agent.name());
        if self.plugins.contains_key(&name) {
            return Err(SchedulerError::Config(format!("plugin {name} registered twice")));
        }
        for metric in agent.metrics() {
            if let Some(owner) = self.metrics.get(&metric.key) {
                return Err(SchedulerError::DuplicateMetric {
                    metric: metric.key.clone(),
                    plugin: owner.to_string(),
                });
            }
        }
        for metric in agent.metrics() {
            self.metrics.insert(metric.key.clone(), Arc::clone(&name));
        }
        self.plugins.insert(name, agent);
        Ok(())
    }

    /// Loop state.
    #[must_use]
    pub const fn state(&self) -> ManagerState {
        self.state
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sender side of the mailbox.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.tx.clone()
    }

    /// Number of dispatched tasks not yet reported back.
    #[must_use]
    pub const fn active_tasks(&self) -> usize {
        self.active_tasks
    }

    /// Agent of a plugin.
    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<&PluginAgent> {
        self.plugins.get(name)
    }

    /// Client by id.
    #[must_use]
    pub fn client(&self, id: u64) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Number of known clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Task by id.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// All live tasks.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Number of plugins in the global queue.
    #[must_use]
    pub fn plugin_queue_len(&self) -> usize {
        self.plugin_queue.len()
    }

    /// True when the plugin waits in the global queue.
    #[must_use]
    pub fn is_plugin_queued(&self, name: &str) -> bool {
        self.plugins
            .get_key_value(name)
            .is_some_and(|(key, _)| self.plugin_queue.contains(key))
    }

    /// True when nothing is running and nothing is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active_tasks == 0 && self.plugin_queue.is_empty()
    }

    // Brings the global queue entry of a plugin in line with its head task.
    fn queue_plugin(&mut self, name: &Arc<str>) {
        let Some(agent) = self.plugins.get(name) else {
            self.plugin_queue.remove(name);
            return;
        };
        match agent.peek_scheduled() {
            None => {
                self.plugin_queue.remove(name);
            }
            Some(at) => {
                if !self.plugin_queue.update(name, at) && agent.has_capacity(&self.tasks) {
                    self.plugin_queue.push(Arc::clone(name), at);
                }
            }
        }
    }

    /// Dispatches every task due by the second of `now`, as far as plugin
    /// capacity allows.
    pub fn process_queue(&mut self, now: DateTime<Utc>) {
        let second = now.timestamp();
        loop {
            let Some((name, at)) = self.plugin_queue.peek().map(|(name, at)| (Arc::clone(name), *at)) else {
                break;
            };
            match self.plugins.get(&name).and_then(PluginAgent::peek_scheduled) {
                None => {
                    self.plugin_queue.remove(&name);
                    continue;
                }
                Some(head) if head != at => {
                    self.plugin_queue.update(&name, head);
                    continue;
                }
                Some(_) => {}
            }
            if at.timestamp() > second {
                break;
            }
            self.plugin_queue.pop();

            let Some(agent) = self.plugins.get_mut(&name) else {
                continue;
            };
            if !agent.has_capacity(&self.tasks) {
                continue;
            }
            let Some(id) = agent.pop_task() else {
                continue;
            };
            self.dispatch(id, now);

            if let Some(agent) = self.plugins.get(&name) {
                if let Some(head) = agent.peek_scheduled() {
                    if agent.has_capacity(&self.tasks) {
                        self.plugin_queue.push(name, head);
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, id: TaskId, now: DateTime<Utc>) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        if task.expire_if_due(now) {
            self.tasks.remove(id);
            return;
        }
        let Some(agent) = self.plugins.get_mut(task.plugin()) else {
            self.tasks.remove(id);
            return;
        };
        let weight = task.weight(agent.max_capacity());
        agent.reserve(id, weight);
        task.set_reserved(weight);
        let job = task.perform(Arc::clone(agent.plugin()));
        self.active_tasks += 1;
        debug!(plugin = %task.plugin(), task = id, role = %task.role(), weight, "dispatch task");

        let tx = self.tx.clone();
        self.spawner.spawn(async move {
            let produced = job.await;
            let completion = Completion { task: id, produced };
            if tx.send(Message::Finished(completion)).await.is_err() {
                warn!("cannot report completion of task {}: scheduler stopped", id);
            }
        });
    }

    /// Applies a completion: returns capacity and requeues recurring tasks.
    pub fn process_finish_request(&mut self, completion: Completion, now: DateTime<Utc>) {
        self.active_tasks = self.active_tasks.saturating_sub(1);
        let id = completion.task;
        let Some(task) = self.tasks.get_mut(id) else {
            warn!("completion of unknown task {}", id);
            return;
        };
        let weight = task.take_reserved().unwrap_or(0);
        if completion.produced {
            if let TaskKind::DirectExporter(direct) = task.kind_mut() {
                direct.done = true;
            }
        }
        let name = Arc::clone(task.plugin());
        let Some(agent) = self.plugins.get_mut(&name) else {
            self.tasks.remove(id);
            return;
        };
        let owned = agent.release(id, weight);

        let mut keep = owned && agent.is_active() && task.is_active() && task.is_recurring();
        if keep {
            match task.reschedule(now, agent.plugin().as_ref(), self.next_check.as_ref()) {
                Ok(()) => agent.push_task(id, task.scheduled()),
                Err(SchedulerError::NoData) => {
                    debug!(plugin = %name, task = id, "one-shot check expired");
                    keep = false;
                }
                Err(err) => {
                    warn!(plugin = %name, task = id, "cannot reschedule {} task: {}", task.role(), err);
                    keep = false;
                }
            }
        }
        if !keep {
            self.tasks.remove(id);
        }
        self.queue_plugin(&name);
    }

    /// Applies the complete item set of one client.
    pub fn process_update_request(&mut self, update: UpdateRequest) {
        let now = update.now;
        if matches!(self.state, ManagerState::Draining | ManagerState::Stopped) {
            if update.client_id <= MAX_BUILTIN_CLIENT_ID {
                for request in &update.requests {
                    update
                        .sink
                        .write(ItemResult::error(request.itemid, SchedulerError::ShuttingDown.to_string(), now));
                }
            } else {
                warn!(client = update.client_id, "cannot process update request during shutdown");
            }
            return;
        }

        let client = match self.clients.entry(update.client_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if update.requests.is_empty() {
                    return;
                }
                debug!(client = update.client_id, "created client");
                entry.insert(Client::new(update.client_id, Arc::clone(&update.sink)))
            }
        };
        client.set_output(Arc::clone(&update.sink));
        client.update_global_rules(update.rules);

        let mut ctx = SchedulingContext {
            plugins: &mut self.plugins,
            tasks: &mut self.tasks,
            next_check: self.next_check.as_ref(),
            config: self.config.as_ref(),
        };
        let mut touched = BTreeSet::new();
        for request in &update.requests {
            let result = resolve_request(&self.aliases, &self.access, &self.metrics, update.client_id, request)
                .and_then(|(plugin, resolved)| {
                    client
                        .add_request(
                            &mut ctx,
                            &plugin,
                            &resolved,
                            &update.sink,
                            now,
                            update.first_active_checks_refreshed,
                        )
                        .map(|()| plugin)
                });
            match result {
                Ok(plugin) => {
                    touched.insert(plugin);
                }
                Err(err) => {
                    if !matches!(err, SchedulerError::DuplicateItem(_)) {
                        if let Some(id) = client.forget_item(request.itemid) {
                            if let Some(plugin) = ctx.tasks.deactivate(id, ctx.plugins) {
                                touched.insert(plugin);
                            }
                        }
                    }
                    debug!(
                        client = update.client_id,
                        itemid = request.itemid,
                        "cannot monitor '{}': {}",
                        request.key,
                        err
                    );
                    update.sink.write(ItemResult::error(request.itemid, err.to_string(), now));
                }
            }
        }
        let report = client.cleanup(&mut ctx, now);
        touched.extend(report.touched);

        self.deactivate_released(report.released, now, &mut touched);
        for name in &touched {
            self.queue_plugin(name);
        }
    }

    // Stops recurring work of plugins nobody uses any more.
    fn deactivate_released(&mut self, released: Vec<Arc<str>>, now: DateTime<Utc>, touched: &mut BTreeSet<Arc<str>>) {
        for name in released {
            let Some(agent) = self.plugins.get(&name) else {
                continue;
            };
            if agent.is_active() {
                continue;
            }
            let queued = agent.queued_tasks();
            let running = agent.running_tasks();
            let runner = agent.plugin().as_runner().is_some();

            for id in queued {
                if self.tasks.get(id).is_some_and(Task::is_recurring) {
                    self.tasks.deactivate(id, &mut self.plugins);
                }
            }
            for id in running {
                if let Some(task) = self.tasks.get_mut(id) {
                    if task.is_recurring() {
                        task.deactivate();
                    }
                }
            }
            if runner {
                self.push_stopper(&name, now);
            }
            debug!(plugin = %name, "plugin deactivated");
            touched.insert(name);
        }
    }

    fn push_stopper(&mut self, name: &Arc<str>, now: DateTime<Utc>) {
        let Some(agent) = self.plugins.get_mut(name) else {
            return;
        };
        let mut task = Task::new(self.tasks.next_id(), Arc::clone(name), TaskKind::Stopper);
        task.schedule_now(now);
        agent.push_task(task.id(), task.scheduled());
        self.tasks.insert(task);
    }

    /// Sweeps the passive client and forgets clients that use no plugin.
    pub fn cleanup_clients(&mut self, now: DateTime<Utc>) {
        let mut touched = BTreeSet::new();
        let mut released = Vec::new();
        if let Some(client) = self.clients.get_mut(&PASSIVE_CHECKS_CLIENT_ID) {
            let mut ctx = SchedulingContext {
                plugins: &mut self.plugins,
                tasks: &mut self.tasks,
                next_check: self.next_check.as_ref(),
                config: self.config.as_ref(),
            };
            let report = client.cleanup(&mut ctx, now);
            touched.extend(report.touched);
            released = report.released;
        }
        self.deactivate_released(released, now, &mut touched);
        for name in &touched {
            self.queue_plugin(name);
        }
        self.clients.retain(|id, client| {
            let keep = client.plugin_count() > 0;
            if !keep {
                debug!(client = id, "removed client");
            }
            keep
        });
    }

    /// Starts draining: queued work is dropped, runners get stopped and no
    /// new requests are accepted.
    pub fn begin_shutdown(&mut self, now: DateTime<Utc>) {
        if matches!(self.state, ManagerState::Draining | ManagerState::Stopped) {
            return;
        }
        info!(active_tasks = self.active_tasks, "scheduler shutting down");
        self.state = ManagerState::Draining;
        self.shutdown_countdown = self.config.shutdown_timeout_secs;

        let mut names: Vec<Arc<str>> = self
            .plugins
            .iter()
            .filter(|(_, agent)| agent.is_active())
            .map(|(name, _)| Arc::clone(name))
            .collect();
        names.sort();

        for name in names {
            let Some(agent) = self.plugins.get_mut(&name) else {
                continue;
            };
            let queued = agent.clear_tasks();
            let running = agent.running_tasks();
            let runner = agent.plugin().as_runner().is_some();
            agent.set_refcount(0);

            for id in queued {
                let Some(task) = self.tasks.get_mut(id) else {
                    continue;
                };
                if let TaskKind::DirectExporter(direct) = task.kind() {
                    if !direct.done {
                        direct.output.write(ItemResult::error(
                            direct.item.itemid,
                            SchedulerError::ShuttingDown.to_string(),
                            now,
                        ));
                    }
                }
                task.deactivate();
                if !task.is_running() {
                    self.tasks.remove(id);
                }
            }
            for id in running {
                if let Some(task) = self.tasks.get_mut(id) {
                    task.deactivate();
                }
            }
            if runner {
                self.push_stopper(&name, now);
            }
            self.queue_plugin(&name);
        }
        self.clients.clear();
    }

    /// Recomputes every queued run instant after a clock jump.
    pub fn reschedule_all(&mut self, now: DateTime<Utc>) {
        let mut dropped = Vec::new();
        for agent in self.plugins.values_mut() {
            for id in agent.clear_tasks() {
                let Some(task) = self.tasks.get_mut(id) else {
                    continue;
                };
                match task.reschedule(now, agent.plugin().as_ref(), self.next_check.as_ref()) {
                    Ok(()) => agent.push_task(id, task.scheduled()),
                    Err(err) => {
                        debug!(plugin = %agent.name(), task = id, "dropping task on reschedule: {}", err);
                        task.deactivate();
                        if !task.is_running() {
                            dropped.push(id);
                        }
                    }
                }
            }
        }
        for id in dropped {
            self.tasks.remove(id);
        }
        let names: Vec<Arc<str>> = self.plugins.keys().cloned().collect();
        let _ = self.plugin_queue.clear();
        for name in &names {
            self.queue_plugin(name);
        }
    }

    /// One second step: clock check, dispatch and the shutdown countdown.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Flow {
        if let Some(last) = self.last_tick {
            let skew = (now - last).num_seconds().unsigned_abs();
            if skew >= self.config.time_skew_tolerance_secs {
                warn!("detected {} seconds time difference between scheduler ticks, rescheduling tasks", skew);
                self.reschedule_all(now);
            }
        }
        self.last_tick = Some(now);
        self.process_queue(now);

        if self.state == ManagerState::Draining {
            if self.is_idle() {
                return Flow::Stop;
            }
            self.shutdown_countdown = self.shutdown_countdown.saturating_sub(1);
            if self.shutdown_countdown == 0 {
                warn!(active_tasks = self.active_tasks, "shutdown timeout expired with tasks still running");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Answers an administrative query.
    ///
    /// # Errors
    ///
    /// Unknown query commands.
    pub fn process_query(&self, query: &Query) -> Result<String, SchedulerError> {
        query::process_query(&self.plugins, query)
    }

    /// Replaces all user-parameter plugins.
    ///
    /// Tasks of removed plugins move to the new plugin serving the same key,
    /// or are dropped when none does.
    ///
    /// # Errors
    ///
    /// Name or metric collisions with regular plugins; nothing changes then.
    pub fn reload_user_parameters(
        &mut self,
        registrations: Vec<PluginRegistration>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let mut incoming: Vec<PluginAgent> = Vec::with_capacity(registrations.len());
        let mut incoming_metrics: HashMap<String, Arc<str>> = HashMap::new();
        for mut registration in registrations {
            registration.user_parameter = true;
            let agent = build_agent(&self.config, &registration)?;
            let name = Arc::clone(agent.name());
            let taken = self.plugins.get(&name).is_some_and(|a| !a.is_user_parameter())
                || incoming.iter().any(|a| *a.name() == name);
            if taken {
                return Err(SchedulerError::Config(format!("plugin {name} already exists")));
            }
            for metric in agent.metrics() {
                if let Some(owner) = self.metrics.get(&metric.key) {
                    if !self.plugins.get(owner).is_some_and(PluginAgent::is_user_parameter) {
                        return Err(SchedulerError::DuplicateMetric {
                            metric: metric.key.clone(),
                            plugin: owner.to_string(),
                        });
                    }
                }
                if let Some(owner) = incoming_metrics.insert(metric.key.clone(), Arc::clone(&name)) {
                    return Err(SchedulerError::DuplicateMetric {
                        metric: metric.key.clone(),
                        plugin: owner.to_string(),
                    });
                }
            }
            incoming.push(agent);
        }

        let old: Vec<Arc<str>> = self
            .plugins
            .iter()
            .filter(|(_, agent)| agent.is_user_parameter())
            .map(|(name, _)| Arc::clone(name))
            .collect();
        let mut orphans: Vec<TaskId> = Vec::new();
        for name in &old {
            self.plugin_queue.remove(name);
            if let Some(mut agent) = self.plugins.remove(name) {
                orphans.extend(agent.clear_tasks());
                orphans.extend(agent.running_tasks());
            }
        }
        self.metrics.retain(|_, owner| !old.contains(owner));

        let names: Vec<Arc<str>> = incoming.iter().map(|a| Arc::clone(a.name())).collect();
        for agent in incoming {
            for metric in agent.metrics() {
                self.metrics.insert(metric.key.clone(), Arc::clone(agent.name()));
            }
            self.plugins.insert(Arc::clone(agent.name()), agent);
        }

        let mut adopted: Vec<(u64, Arc<str>)> = Vec::new();
        for id in orphans {
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            let target = task
                .item()
                .and_then(|item| self.metrics.get(key_name(&item.key)))
                .cloned()
                .filter(|plugin| self.plugins.get(plugin).is_some_and(PluginAgent::is_user_parameter));
            match (target, task.is_active()) {
                (Some(plugin), true) => {
                    task.set_plugin(Arc::clone(&plugin));
                    if let TaskKind::Exporter(exporter) = task.kind() {
                        adopted.push((exporter.client_id, Arc::clone(&plugin)));
                    }
                    if let Some(agent) = self.plugins.get_mut(&plugin) {
                        match task.reserved() {
                            Some(weight) => agent.adopt_running(id, weight),
                            None => agent.push_task(id, task.scheduled()),
                        }
                    }
                    debug!(task = id, plugin = %plugin, "task moved to reloaded plugin");
                }
                _ => {
                    task.deactivate();
                    if !task.is_running() {
                        self.tasks.remove(id);
                    }
                }
            }
        }

        for (client_id, plugin) in adopted {
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.touch_plugin(&plugin, now);
            }
        }
        for client in self.clients.values_mut() {
            client.retain_live_items(&self.tasks);
            client.retain_plugins(&self.plugins);
        }
        for name in &names {
            let users = self
                .clients
                .values()
                .filter(|client| client.plugin_usage(name).is_some())
                .count();
            if let Some(agent) = self.plugins.get_mut(name) {
                agent.set_refcount(u32::try_from(users).unwrap_or(u32::MAX));
            }
            self.queue_plugin(name);
        }
        info!(plugins = names.len(), "user parameters reloaded");
        Ok(())
    }

    /// Handles one mailbox message received at `now`.
    pub fn process_message(&mut self, message: Message, now: DateTime<Utc>) -> Flow {
        match message {
            Message::Update(mut update) => {
                update.now = now;
                self.process_update_request(update);
            }
            Message::Finished(completion) => self.process_finish_request(completion, now),
            Message::Query { query, reply } => {
                let _ = reply.send(self.process_query(&query));
            }
            Message::ReloadUserParameters { registrations, reply } => {
                let _ = reply.send(self.reload_user_parameters(registrations, now));
            }
            Message::Stop => self.begin_shutdown(now),
        }
        if self.state == ManagerState::Draining && self.is_idle() {
            return Flow::Stop;
        }
        Flow::Continue
    }

    /// Drains the mailbox without waiting.
    pub fn process_pending_messages(&mut self, now: DateTime<Utc>) -> Flow {
        let Some(mut rx) = self.rx.take() else {
            return Flow::Continue;
        };
        let mut flow = Flow::Continue;
        while let Ok(message) = rx.try_recv() {
            flow = self.process_message(message, now);
            if flow == Flow::Stop {
                break;
            }
        }
        self.rx = Some(rx);
        flow
    }

    /// Runs the control loop until shutdown completes.
    pub async fn run(mut self) {
        let Some(mut rx) = self.rx.take() else {
            warn!("scheduler mailbox already taken");
            return;
        };
        self.state = ManagerState::Running;
        info!(plugins = self.plugins.len(), "scheduler started");

        let mut ticker = time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let period = Duration::from_secs(self.config.passive_cleanup_interval_secs.max(1));
        let mut cleaner = time::interval_at(Instant::now() + period, period);

        loop {
            let flow = tokio::select! {
                _ = ticker.tick() => self.tick(clock::now()),
                _ = cleaner.tick() => {
                    self.cleanup_clients(clock::now());
                    Flow::Continue
                }
                message = rx.recv() => match message {
                    Some(message) => self.process_message(message, clock::now()),
                    None => Flow::Stop,
                },
            };
            if flow == Flow::Stop {
                break;
            }
        }
        self.state = ManagerState::Stopped;
        info!(active_tasks = self.active_tasks, "scheduler stopped");
    }
}
