//! Configuration models for the scheduler, plugins, and timeouts.

pub mod scheduler;

pub use scheduler::{
    get_plugin_capacity, get_plugin_force_active_checks, GlobalOptions, PluginOptions,
    PluginSystemOptions, SchedulerConfig,
};
