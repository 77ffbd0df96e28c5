//! Assembles a [`Manager`] from configuration and plugin registrations.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{IntervalNextCheck, Manager, NextCheck, PluginRegistration, PluginRegistry, SchedulerError, Spawn};

/// Collects plugins and options, then builds a validated manager.
pub struct ManagerBuilder {
    config: SchedulerConfig,
    registry: PluginRegistry,
    next_check: Arc<dyn NextCheck>,
}

impl std::fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ManagerBuilder {
    /// Builder over `config` with the fixed-interval delay calculator.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: PluginRegistry::new(),
            next_check: Arc::new(IntervalNextCheck),
        }
    }

    /// Registers one plugin.
    ///
    /// # Errors
    ///
    /// Invalid metric keys or metrics already served by another plugin.
    pub fn with_plugin(mut self, registration: PluginRegistration) -> Result<Self, SchedulerError> {
        self.registry.register(registration)?;
        Ok(self)
    }

    /// Replaces the collected registrations.
    #[must_use]
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Uses a custom delay calculator.
    #[must_use]
    pub fn with_next_check(mut self, next_check: Arc<dyn NextCheck>) -> Self {
        self.next_check = next_check;
        self
    }

    /// Validates the configuration and builds the manager.
    ///
    /// # Errors
    ///
    /// Invalid configuration, aliases, access rules or plugin options.
    pub fn build<S: Spawn>(self, spawner: S) -> Result<Manager<S>, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Config(format!("config invalid: {e}")))?;
        Manager::new(self.config, self.registry.into_registrations(), spawner, self.next_check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Plugin;

    struct Named(&'static str);

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    struct NoSpawn;

    impl Spawn for NoSpawn {
        fn spawn<F>(&self, _fut: F)
        where
            F: std::future::Future<Output = ()> + Send + 'static,
        {
        }
    }

    #[test]
    fn builds_with_plugins() {
        let manager = ManagerBuilder::new(SchedulerConfig::default())
            .with_plugin(PluginRegistration::new(Arc::new(Named("cpu")), &[("system.cpu.num", "CPUs")]))
            .unwrap()
            .build(NoSpawn)
            .unwrap();
        assert!(manager.plugin("cpu").is_some());
        assert_eq!(manager.plugin("cpu").unwrap().max_capacity(), 1000);
    }

    #[test]
    fn rejects_duplicate_metric() {
        let result = ManagerBuilder::new(SchedulerConfig::default())
            .with_plugin(PluginRegistration::new(Arc::new(Named("a")), &[("k", "")]))
            .unwrap()
            .with_plugin(PluginRegistration::new(Arc::new(Named("b")), &[("k", "")]));
        assert!(matches!(result, Err(SchedulerError::DuplicateMetric { .. })));
    }

    #[test]
    fn rejects_invalid_config() {
        let config = SchedulerConfig {
            timeout_secs: 0,
            ..SchedulerConfig::default()
        };
        let result = ManagerBuilder::new(config).build(NoSpawn);
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }
}
