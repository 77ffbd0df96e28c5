//! Deterministic scheduling harness shared by the integration tests.
//!
//! Time is driven by hand, dispatched jobs are collected and run to
//! completion between ticks, and plugins record the offset (in seconds from
//! the start) of every call they receive.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use prometheus_agent_scheduler::builders::ManagerBuilder;
use prometheus_agent_scheduler::config::{GlobalOptions, PluginOptions, PluginSystemOptions, SchedulerConfig};
use prometheus_agent_scheduler::core::{
    Collector, Configurator, ExportValue, Exporter, Flow, Manager, NextCheck, Plugin, PluginError,
    PluginRegistration, Request, Runner, SchedulerError, Spawn, TaskContext, UpdateRequest, WatchItem, Watcher,
};
use prometheus_agent_scheduler::infra::sink::InMemoryResultSink;
use prometheus_agent_scheduler::util::clock::at_second;

/// Start of every scenario; a multiple of all delays the tests use.
pub const START: i64 = 1_699_999_920;

/// Active-check client used by most scenarios.
pub const ACTIVE_CLIENT: u64 = 101;

/// Hand-driven clock in whole seconds.
#[derive(Debug, Clone)]
pub struct TestClock {
    start: i64,
    now: Arc<AtomicI64>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(START)
    }
}

impl TestClock {
    pub fn new(start: i64) -> Self {
        Self {
            start,
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        at_second(self.now.load(Ordering::SeqCst), 0)
    }

    /// Seconds since the start.
    pub fn offset(&self) -> i64 {
        self.now.load(Ordering::SeqCst) - self.start
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Collects dispatched jobs until the test runs them.
#[derive(Clone, Default)]
pub struct DeferredSpawner {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl DeferredSpawner {
    /// Runs every collected job to completion; returns how many ran.
    pub fn run_all(&self) -> usize {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        let count = jobs.len();
        for job in jobs {
            futures::executor::block_on(job);
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl Spawn for DeferredSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs.lock().push(Box::pin(fut));
    }
}

/// Integer delays aligned to multiples of the delay, ignoring item ids.
#[derive(Debug, Default)]
pub struct AlignedNextCheck;

impl NextCheck for AlignedNextCheck {
    fn next_check(
        &self,
        _itemid: u64,
        delay: &str,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, bool), SchedulerError> {
        let invalid = |reason: &str| SchedulerError::InvalidDelay {
            delay: delay.to_string(),
            reason: reason.to_string(),
        };
        let delay: i64 = delay.parse().map_err(|_| invalid("not a number"))?;
        if delay <= 0 {
            return Err(invalid("not positive"));
        }
        let seconds = now.timestamp();
        Ok((at_second(seconds - seconds % delay + delay, 0), true))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Roles {
    collector: bool,
    exporter: bool,
    runner: bool,
    watcher: bool,
    configurator: bool,
}

#[derive(Debug, Clone)]
enum Reply {
    Offset,
    Nothing,
    Fail(String),
}

/// Plugin recording the offset of every call.
///
/// Exports are recorded under the bare key; the other roles under `$collect`,
/// `$start`, `$stop`, `$watch` and `$configure`.
pub struct MockPlugin {
    name: String,
    roles: Roles,
    period: u32,
    reply: Reply,
    clock: TestClock,
    calls: Mutex<BTreeMap<String, Vec<i64>>>,
    watched: Mutex<Vec<WatchItem>>,
    configured: Mutex<Option<serde_json::Value>>,
}

impl MockPlugin {
    pub fn new(name: &str, clock: &TestClock) -> Self {
        Self {
            name: name.to_string(),
            roles: Roles::default(),
            period: 1,
            reply: Reply::Offset,
            clock: clock.clone(),
            calls: Mutex::new(BTreeMap::new()),
            watched: Mutex::new(Vec::new()),
            configured: Mutex::new(None),
        }
    }

    pub fn collector(mut self, period: u32) -> Self {
        self.roles.collector = true;
        self.period = period;
        self
    }

    pub fn exporter(mut self) -> Self {
        self.roles.exporter = true;
        self
    }

    pub fn runner(mut self) -> Self {
        self.roles.runner = true;
        self
    }

    pub fn watcher(mut self) -> Self {
        self.roles.watcher = true;
        self
    }

    pub fn configurator(mut self) -> Self {
        self.roles.configurator = true;
        self
    }

    /// Exports produce no value.
    pub fn silent(mut self) -> Self {
        self.reply = Reply::Nothing;
        self
    }

    /// Exports fail with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.reply = Reply::Fail(message.to_string());
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn metric(&self) -> &str {
        &self.name
    }

    /// Offsets of the calls recorded under `key`.
    pub fn calls(&self, key: &str) -> Vec<i64> {
        self.calls.lock().get(key).cloned().unwrap_or_default()
    }

    /// Items of the latest watch call.
    pub fn watched(&self) -> Vec<WatchItem> {
        self.watched.lock().clone()
    }

    /// Options of the latest configure call.
    pub fn configured(&self) -> Option<serde_json::Value> {
        self.configured.lock().clone()
    }

    fn record(&self, key: &str) -> i64 {
        let offset = self.clock.offset();
        self.calls.lock().entry(key.to_string()).or_default().push(offset);
        offset
    }
}

impl Plugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_collector(&self) -> Option<&dyn Collector> {
        self.roles.collector.then_some(self as &dyn Collector)
    }

    fn as_exporter(&self) -> Option<&dyn Exporter> {
        self.roles.exporter.then_some(self as &dyn Exporter)
    }

    fn as_runner(&self) -> Option<&dyn Runner> {
        self.roles.runner.then_some(self as &dyn Runner)
    }

    fn as_watcher(&self) -> Option<&dyn Watcher> {
        self.roles.watcher.then_some(self as &dyn Watcher)
    }

    fn as_configurator(&self) -> Option<&dyn Configurator> {
        self.roles.configurator.then_some(self as &dyn Configurator)
    }
}

#[async_trait]
impl Collector for MockPlugin {
    async fn collect(&self) -> Result<(), PluginError> {
        self.record("$collect");
        Ok(())
    }

    fn period(&self) -> u32 {
        self.period
    }
}

#[async_trait]
impl Exporter for MockPlugin {
    async fn export(
        &self,
        key: &str,
        _params: &[String],
        _ctx: &TaskContext,
    ) -> Result<Option<ExportValue>, PluginError> {
        let offset = self.record(key);
        match &self.reply {
            Reply::Offset => Ok(Some(ExportValue::Integer(offset))),
            Reply::Nothing => Ok(None),
            Reply::Fail(message) => Err(PluginError::Failed(message.clone())),
        }
    }
}

#[async_trait]
impl Runner for MockPlugin {
    async fn start(&self) {
        self.record("$start");
    }

    async fn stop(&self) {
        self.record("$stop");
    }
}

#[async_trait]
impl Watcher for MockPlugin {
    async fn watch(&self, items: &[WatchItem], _ctx: &TaskContext) {
        self.record("$watch");
        *self.watched.lock() = items.to_vec();
    }
}

#[async_trait]
impl Configurator for MockPlugin {
    async fn configure(&self, _global: &GlobalOptions, options: Option<&serde_json::Value>) {
        self.record("$configure");
        *self.configured.lock() = options.cloned();
    }

    fn validate(&self, _options: Option<&serde_json::Value>) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Registration serving the plugin's own name as its only metric.
pub fn registration(plugin: &Arc<MockPlugin>) -> PluginRegistration {
    PluginRegistration::new(Arc::clone(plugin) as Arc<dyn Plugin>, &[(plugin.metric(), "Mock metric.")])
}

/// Configuration with a mailbox large enough for any scenario.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        mailbox_capacity: 4096,
        ..SchedulerConfig::default()
    }
}

/// Plugin settings with a capacity override.
pub fn capacity_options(capacity: u32) -> PluginOptions {
    PluginOptions {
        system: PluginSystemOptions {
            capacity: Some(capacity),
            ..PluginSystemOptions::default()
        },
        ..PluginOptions::default()
    }
}

/// Request with log metadata and a 3 second timeout.
pub fn request(itemid: u64, key: &str, delay: &str) -> Request {
    Request {
        itemid,
        key: key.to_string(),
        delay: delay.to_string(),
        last_logsize: Some(0),
        mtime: Some(0),
        timeout: Some("3".to_string()),
    }
}

/// What a watcher receives for `request`.
pub fn watch_item(request: &Request) -> WatchItem {
    WatchItem {
        itemid: request.itemid,
        key: request.key.clone(),
        delay: request.delay.clone(),
        last_logsize: request.last_logsize,
        mtime: request.mtime,
        timeout_secs: 3,
    }
}

/// Manager driven second by second on a [`TestClock`].
pub struct Harness {
    pub manager: Manager<DeferredSpawner>,
    pub spawner: DeferredSpawner,
    pub clock: TestClock,
    pub sink: Arc<InMemoryResultSink>,
}

impl Harness {
    pub fn new(clock: &TestClock, plugins: &[Arc<MockPlugin>]) -> Self {
        Self::with_config(clock, plugins, test_config())
    }

    pub fn with_config(clock: &TestClock, plugins: &[Arc<MockPlugin>], config: SchedulerConfig) -> Self {
        Self::with_registrations(clock, plugins.iter().map(registration).collect(), config)
    }

    pub fn with_registrations(
        clock: &TestClock,
        registrations: Vec<PluginRegistration>,
        config: SchedulerConfig,
    ) -> Self {
        let spawner = DeferredSpawner::default();
        let mut builder = ManagerBuilder::new(config).with_next_check(Arc::new(AlignedNextCheck));
        for registration in registrations {
            builder = builder.with_plugin(registration).expect("plugin registers");
        }
        let manager = builder.build(spawner.clone()).expect("manager should build");
        Self {
            manager,
            spawner,
            clock: clock.clone(),
            sink: Arc::new(InMemoryResultSink::new()),
        }
    }

    /// Sends the complete item set of a client at the current time.
    pub fn update(&mut self, client_id: u64, requests: Vec<Request>) {
        self.update_with(client_id, requests, true);
    }

    pub fn update_with(&mut self, client_id: u64, requests: Vec<Request>, refreshed: bool) {
        self.manager.process_update_request(UpdateRequest {
            client_id,
            sink: self.sink.clone(),
            first_active_checks_refreshed: refreshed,
            rules: Vec::new(),
            requests,
            now: self.clock.now(),
        });
    }

    /// Runs the current second: dispatch, job execution and completions.
    pub fn turn(&mut self) -> Flow {
        let now = self.clock.now();
        let ticked = self.manager.tick(now);
        self.spawner.run_all();
        let drained = self.manager.process_pending_messages(now);
        if ticked == Flow::Stop || drained == Flow::Stop {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    /// Advances one second and runs it.
    pub fn step(&mut self) -> Flow {
        self.clock.advance(1);
        self.turn()
    }

    pub fn iterate(&mut self, seconds: usize) {
        for _ in 0..seconds {
            self.step();
        }
    }
}
