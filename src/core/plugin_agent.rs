//! Per-plugin scheduling state: task queue, capacity and usage count.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::heap::IndexedHeap;
use crate::core::plugin::Plugin;
use crate::core::registry::MetricDescriptor;
use crate::core::task::{TaskId, TaskTable};

/// Plugin agents keyed by plugin name.
pub type PluginMap = HashMap<Arc<str>, PluginAgent>;

/// Scheduling wrapper of one loaded plugin.
pub struct PluginAgent {
    name: Arc<str>,
    plugin: Arc<dyn Plugin>,
    metrics: Vec<MetricDescriptor>,
    tasks: IndexedHeap<TaskId, DateTime<Utc>>,
    running: HashSet<TaskId>,
    max_capacity: u32,
    used_capacity: u32,
    refcount: u32,
    user_parameter: bool,
    force_active_checks_on_start: bool,
}

impl std::fmt::Debug for PluginAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginAgent")
            .field("name", &self.name)
            .field("queued", &self.tasks.len())
            .field("running", &self.running.len())
            .field("max_capacity", &self.max_capacity)
            .field("used_capacity", &self.used_capacity)
            .field("refcount", &self.refcount)
            .finish_non_exhaustive()
    }
}

impl PluginAgent {
    /// Agent for `plugin` with a resolved capacity.
    pub fn new(
        plugin: Arc<dyn Plugin>,
        metrics: Vec<MetricDescriptor>,
        max_capacity: u32,
        user_parameter: bool,
        force_active_checks_on_start: bool,
    ) -> Self {
        Self {
            name: Arc::from(plugin.name()),
            plugin,
            metrics,
            tasks: IndexedHeap::new(),
            running: HashSet::new(),
            max_capacity,
            used_capacity: 0,
            refcount: 0,
            user_parameter,
            force_active_checks_on_start,
        }
    }

    /// Plugin name.
    #[must_use]
    pub const fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Plugin implementation.
    #[must_use]
    pub const fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Served metrics.
    #[must_use]
    pub fn metrics(&self) -> &[MetricDescriptor] {
        &self.metrics
    }

    /// True when the plugin serves metric `key`.
    #[must_use]
    pub fn serves(&self, key: &str) -> bool {
        self.metrics.iter().any(|m| m.key == key)
    }

    /// Capacity limit.
    #[must_use]
    pub const fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    /// Capacity held by running tasks.
    #[must_use]
    pub const fn used_capacity(&self) -> u32 {
        self.used_capacity
    }

    /// Number of clients using the plugin.
    #[must_use]
    pub const fn refcount(&self) -> u32 {
        self.refcount
    }

    /// True while at least one client uses the plugin.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.refcount != 0
    }

    /// Adds a client user; returns true on the zero to one transition.
    pub fn acquire(&mut self) -> bool {
        self.refcount += 1;
        self.refcount == 1
    }

    /// Drops a client user; returns true when no user is left.
    pub fn release_usage(&mut self) -> bool {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount == 0
    }

    /// Overrides the user count (shutdown and reload).
    pub fn set_refcount(&mut self, refcount: u32) {
        self.refcount = refcount;
    }

    /// Defined by user parameters.
    #[must_use]
    pub const fn is_user_parameter(&self) -> bool {
        self.user_parameter
    }

    /// Items are checked right away on a client's first refresh.
    #[must_use]
    pub const fn force_active_checks_on_start(&self) -> bool {
        self.force_active_checks_on_start
    }

    /// Head task.
    #[must_use]
    pub fn peek_task(&self) -> Option<TaskId> {
        self.tasks.peek().map(|(id, _)| *id)
    }

    /// Run instant of the head task.
    #[must_use]
    pub fn peek_scheduled(&self) -> Option<DateTime<Utc>> {
        self.tasks.peek().map(|(_, at)| *at)
    }

    /// Removes the head task.
    pub fn pop_task(&mut self) -> Option<TaskId> {
        self.tasks.pop().map(|(id, _)| id)
    }

    /// Queues a task, or moves it when already queued.
    pub fn push_task(&mut self, id: TaskId, scheduled: DateTime<Utc>) {
        self.tasks.push(id, scheduled);
    }

    /// Moves a queued task; false when it is not queued.
    pub fn update_task(&mut self, id: TaskId, scheduled: DateTime<Utc>) -> bool {
        self.tasks.update(&id, scheduled)
    }

    /// Unqueues a task; false when it was not queued.
    pub fn remove_task(&mut self, id: TaskId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Queue slot of a task.
    #[must_use]
    pub fn task_position(&self, id: TaskId) -> Option<usize> {
        self.tasks.position(&id)
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.tasks.len()
    }

    /// Queued task ids in slot order.
    #[must_use]
    pub fn queued_tasks(&self) -> Vec<TaskId> {
        self.tasks.keys().copied().collect()
    }

    /// Unqueues everything.
    pub fn clear_tasks(&mut self) -> Vec<TaskId> {
        self.tasks.clear()
    }

    /// Tasks currently dispatched.
    #[must_use]
    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.running.iter().copied().collect()
    }

    /// Takes `weight` capacity for a dispatched task.
    pub fn reserve(&mut self, id: TaskId, weight: u32) {
        debug_assert!(
            self.used_capacity + weight <= self.max_capacity,
            "plugin {} capacity exceeded",
            self.name
        );
        self.used_capacity += weight;
        self.running.insert(id);
    }

    /// Takes over the reservation of a task already running elsewhere.
    ///
    /// Used when tasks move between agents; the reservation may briefly exceed
    /// the limit if the new agent is smaller.
    pub fn adopt_running(&mut self, id: TaskId, weight: u32) {
        self.used_capacity += weight;
        self.running.insert(id);
    }

    /// Returns capacity of a finished task.
    ///
    /// Only tasks this agent reserved or adopted give capacity back; false
    /// means the task ran under an agent that has since been replaced.
    pub fn release(&mut self, id: TaskId, weight: u32) -> bool {
        if !self.running.remove(&id) {
            return false;
        }
        self.used_capacity = self.used_capacity.saturating_sub(weight);
        true
    }

    /// True when a task is queued and its weight fits the free capacity.
    #[must_use]
    pub fn has_capacity(&self, tasks: &TaskTable) -> bool {
        self.peek_task()
            .and_then(|id| tasks.get(id))
            .is_some_and(|task| self.used_capacity + task.weight(self.max_capacity) <= self.max_capacity)
    }
}
