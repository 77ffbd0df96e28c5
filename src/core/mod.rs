//! Core scheduling: plugins, clients, tasks and the control loop.

pub mod client;
pub mod error;
pub mod executor;
pub mod heap;
pub mod manager;
pub mod message;
pub mod nextcheck;
pub mod output;
pub mod plugin;
pub mod plugin_agent;
pub mod query;
pub mod registry;
pub mod rules;
pub mod task;

pub use client::{
    Client, ClientIdAllocator, LOCAL_CHECKS_CLIENT_ID, MAX_BUILTIN_CLIENT_ID, PASSIVE_CHECKS_CLIENT_ID,
};
pub use error::{AppResult, SchedulerError};
pub use executor::{Completion, Spawn, TaskJob};
pub use heap::IndexedHeap;
pub use manager::{resolve_request, Flow, Manager, ManagerState};
pub use message::{Message, Query, Request, UpdateRequest};
pub use nextcheck::{IntervalNextCheck, NextCheck};
pub use output::{ItemResult, ResultWriter};
pub use plugin::{
    Collector, Configurator, ExportValue, Exporter, ItemMeta, Plugin, PluginError, Runner, TaskContext,
    WatchItem, Watcher,
};
pub use plugin_agent::{PluginAgent, PluginMap};
pub use registry::{MetricDescriptor, PluginRegistration, PluginRegistry};
pub use rules::{empty_rules, ExpressionType, GlobalExpression, RuleBundle, SharedRules};
pub use task::{Task, TaskId, TaskKind, TaskRole, TaskTable};
