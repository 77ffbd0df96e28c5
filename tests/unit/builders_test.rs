//! Tests for builder modules

use std::sync::Arc;

use prometheus_agent_scheduler::builders::ManagerBuilder;
use prometheus_agent_scheduler::config::{PluginOptions, PluginSystemOptions, SchedulerConfig};
use prometheus_agent_scheduler::core::{
    ManagerState, Plugin, PluginRegistration, PluginRegistry, SchedulerError, Spawn,
};

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

fn registration(name: &'static str, keys: &[(&str, &str)]) -> PluginRegistration {
    PluginRegistration::new(Arc::new(Named(name)), keys)
}

#[test]
fn test_manager_builder_defaults() {
    let manager = ManagerBuilder::new(SchedulerConfig::default())
        .with_plugin(registration("cpu", &[("system.cpu.num", "CPUs"), ("system.cpu.load", "Load")]))
        .unwrap()
        .build(NoSpawn)
        .unwrap();
    assert_eq!(manager.state(), ManagerState::Initializing);
    assert_eq!(manager.plugin_queue_len(), 0);
    assert!(manager.is_idle());
    let cpu = manager.plugin("cpu").unwrap();
    assert_eq!(cpu.metrics().len(), 2);
    assert!(!cpu.is_active());
}

#[test]
fn test_manager_builder_capacity_limits() {
    let mut config = SchedulerConfig::default();
    for (name, capacity) in [("small", 5), ("big", 50)] {
        config.plugins.insert(
            name.to_string(),
            PluginOptions {
                system: PluginSystemOptions {
                    capacity: Some(capacity),
                    ..PluginSystemOptions::default()
                },
                ..PluginOptions::default()
            },
        );
    }
    let manager = ManagerBuilder::new(config)
        .with_plugin(registration("small", &[("a", "")]))
        .unwrap()
        .with_plugin(registration("big", &[("b", "")]).with_max_capacity(20))
        .unwrap()
        .build(NoSpawn)
        .unwrap();
    assert_eq!(manager.plugin("small").unwrap().max_capacity(), 5);
    assert_eq!(manager.plugin("big").unwrap().max_capacity(), 20);
}

#[test]
fn test_manager_builder_with_registry() {
    let mut registry = PluginRegistry::new();
    let plugin: Arc<dyn Plugin> = Arc::new(Named("net"));
    registry
        .register(PluginRegistration::new(Arc::clone(&plugin), &[("net.if.in", "")]))
        .unwrap();
    registry
        .register(PluginRegistration::new(plugin, &[("net.if.out", "")]))
        .unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.owner("net.if.out"), Some("net"));

    let manager = ManagerBuilder::new(SchedulerConfig::default())
        .with_registry(registry)
        .build(NoSpawn)
        .unwrap();
    assert_eq!(manager.plugin("net").unwrap().metrics().len(), 2);
}

#[test]
fn test_manager_builder_rejects_bad_aliases() {
    let config = SchedulerConfig {
        aliases: vec!["no-separator".into()],
        ..SchedulerConfig::default()
    };
    let result = ManagerBuilder::new(config).build(NoSpawn);
    assert!(matches!(result, Err(SchedulerError::Config(_))));
}

#[test]
fn test_manager_builder_rejects_parameterized_metric() {
    let result = ManagerBuilder::new(SchedulerConfig::default()).with_plugin(registration("x", &[("x[1]", "")]));
    assert!(matches!(result, Err(SchedulerError::InvalidKey(_))));
}
