//! # Prometheus Agent Scheduler
//!
//! Capacity-aware task scheduler for the plugins of a monitoring agent.
//!
//! Plugins are loaded once and serve metric keys. Clients (the agent itself,
//! the server's passive checks and every active-check server) send their
//! complete item set; the scheduler turns it into tasks, runs each task on a
//! worker when it is due and delivers results to the client's sink.
//!
//! ## Scheduling model
//!
//! - **Two-level queue**: every plugin agent keeps its tasks ordered by run
//!   instant; the manager keeps agents ordered by their head task.
//! - **Roles**: collectors sample periodically, exporters answer per-item
//!   checks, runners are started and stopped, watchers receive batched item
//!   sets and configurators apply options. Roles due in the same second run
//!   in a fixed order.
//! - **Capacity**: exports take one unit of their plugin's capacity, every
//!   other role takes all of it. A plugin whose head task does not fit waits
//!   until running tasks finish.
//! - **Single owner**: all scheduling state lives on one control loop; workers
//!   report back through its mailbox.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_agent_scheduler::builders::ManagerBuilder;
//! use prometheus_agent_scheduler::config::SchedulerConfig;
//! use prometheus_agent_scheduler::core::PluginRegistration;
//! use prometheus_agent_scheduler::runtime::{start, TokioSpawner};
//!
//! let manager = ManagerBuilder::new(SchedulerConfig::default())
//!     .with_plugin(PluginRegistration::new(Arc::new(cpu), &[("system.cpu.num", "Number of CPUs")]))?
//!     .build(TokioSpawner::current()?)?;
//! let (handle, done) = start(manager);
//! let value = handle.perform_single(0, "system.cpu.num", None, Duration::from_secs(5)).await?;
//! handle.stop().await?;
//! done.await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: plugins, clients, tasks and the control loop.
pub mod core;
/// Configuration models for the scheduler and plugins.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters: result sinks.
pub mod infra;
/// Runtime adapters and the caller-facing API.
pub mod runtime;
/// Shared utilities.
pub mod util;
