//! Plugin registration: which plugin serves which metric keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::plugin::Plugin;
use crate::core::SchedulerError;
use crate::util::itemkey::parse_key;

/// A metric key with its human readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    /// Bare metric key.
    pub key: String,
    /// Description shown by status queries.
    pub description: String,
}

/// One plugin together with the metrics it serves.
#[derive(Clone)]
pub struct PluginRegistration {
    /// Plugin implementation.
    pub plugin: Arc<dyn Plugin>,
    /// Served metrics.
    pub metrics: Vec<MetricDescriptor>,
    /// Capacity ceiling declared by the plugin, 0 for the default.
    pub max_capacity: u32,
    /// Defined by user parameters and replaced on reload.
    pub user_parameter: bool,
}

impl PluginRegistration {
    /// Registration of `plugin` serving `(key, description)` pairs.
    pub fn new(plugin: Arc<dyn Plugin>, metrics: &[(&str, &str)]) -> Self {
        Self {
            plugin,
            metrics: metrics
                .iter()
                .map(|(key, description)| MetricDescriptor {
                    key: (*key).to_string(),
                    description: (*description).to_string(),
                })
                .collect(),
            max_capacity: 0,
            user_parameter: false,
        }
    }

    /// Sets the plugin's capacity ceiling.
    #[must_use]
    pub const fn with_max_capacity(mut self, max_capacity: u32) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Marks the plugin as user-parameter defined.
    #[must_use]
    pub const fn user_parameter(mut self) -> Self {
        self.user_parameter = true;
        self
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.plugin.name()
    }
}

impl fmt::Debug for PluginRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistration")
            .field("name", &self.name())
            .field("metrics", &self.metrics)
            .field("max_capacity", &self.max_capacity)
            .field("user_parameter", &self.user_parameter)
            .finish()
    }
}

/// Collects registrations and enforces metric key uniqueness.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    registrations: Vec<PluginRegistration>,
    owners: HashMap<String, String>,
}

impl PluginRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration.
    ///
    /// Registering the same plugin instance again merges its metrics.
    ///
    /// # Errors
    ///
    /// Fails for invalid metric keys, metrics owned by another plugin, and a
    /// different plugin instance reusing a registered name.
    pub fn register(&mut self, registration: PluginRegistration) -> Result<(), SchedulerError> {
        let name = registration.name().to_string();
        for metric in &registration.metrics {
            let (key, params) = parse_key(&metric.key)?;
            if !params.is_empty() || key != metric.key {
                return Err(SchedulerError::InvalidKey(format!(
                    "{}: metric keys cannot have parameters",
                    metric.key
                )));
            }
            if let Some(owner) = self.owners.get(&metric.key) {
                return Err(SchedulerError::DuplicateMetric {
                    metric: metric.key.clone(),
                    plugin: owner.clone(),
                });
            }
        }

        match self.registrations.iter_mut().find(|r| r.name() == name) {
            Some(existing) => {
                if !Arc::ptr_eq(&existing.plugin, &registration.plugin) {
                    return Err(SchedulerError::Config(format!(
                        "plugin name \"{name}\" is already used by another plugin"
                    )));
                }
                for metric in &registration.metrics {
                    self.owners.insert(metric.key.clone(), name.clone());
                }
                existing.metrics.extend(registration.metrics);
                existing.max_capacity = existing.max_capacity.max(registration.max_capacity);
            }
            None => {
                for metric in &registration.metrics {
                    self.owners.insert(metric.key.clone(), name.clone());
                }
                self.registrations.push(registration);
            }
        }
        Ok(())
    }

    /// Plugin serving `metric`.
    #[must_use]
    pub fn owner(&self, metric: &str) -> Option<&str> {
        self.owners.get(metric).map(String::as_str)
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Registrations in registration order.
    #[must_use]
    pub fn registrations(&self) -> &[PluginRegistration] {
        &self.registrations
    }

    /// Consumes the registry.
    #[must_use]
    pub fn into_registrations(self) -> Vec<PluginRegistration> {
        self.registrations
    }
}
