//! Scheduler configuration structures.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;
use crate::util::keyaccess::KeyAccessRule;

/// Options every configurator receives regardless of plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalOptions {
    /// Default check timeout in seconds.
    pub timeout_secs: u64,
    /// Source address for outgoing connections.
    pub source_ip: Option<String>,
}

/// Scheduler-level settings of one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSystemOptions {
    /// Concurrent capacity, 0 or unset uses the default.
    #[serde(default)]
    pub capacity: Option<u32>,
    /// 1 to check items immediately on first refresh, 0 or -1 to not.
    #[serde(default)]
    pub force_active_checks_on_start: Option<i32>,
}

/// Settings of one plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginOptions {
    /// Scheduler settings.
    #[serde(default)]
    pub system: PluginSystemOptions,
    /// Free-form options handed to the plugin's configurator.
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default item timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Source address for outgoing connections.
    #[serde(default)]
    pub source_ip: Option<String>,
    /// Capacity of plugins without an explicit capacity.
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,
    /// Capacity ceiling of plugins that register none.
    #[serde(default = "default_capacity")]
    pub default_max_capacity: u32,
    /// Global default of the per-plugin force-active-checks flag.
    #[serde(default)]
    pub force_active_checks_on_start: i32,
    /// Depth of the control loop mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Seconds the scheduler waits for running tasks on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u32,
    /// Tick gap in seconds treated as a clock jump.
    #[serde(default = "default_time_skew_tolerance_secs")]
    pub time_skew_tolerance_secs: u64,
    /// Period of the passive client sweep in seconds.
    #[serde(default = "default_passive_cleanup_interval_secs")]
    pub passive_cleanup_interval_secs: u64,
    /// `name:key` alias definitions.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Ordered key access rules.
    #[serde(default)]
    pub key_access: Vec<KeyAccessRule>,
    /// Per-plugin settings keyed by plugin name.
    #[serde(default)]
    pub plugins: HashMap<String, PluginOptions>,
}

const fn default_timeout_secs() -> u64 {
    3
}

const fn default_capacity() -> u32 {
    1000
}

const fn default_mailbox_capacity() -> usize {
    10
}

const fn default_shutdown_timeout_secs() -> u32 {
    5
}

const fn default_time_skew_tolerance_secs() -> u64 {
    10
}

const fn default_passive_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            source_ip: None,
            default_capacity: default_capacity(),
            default_max_capacity: default_capacity(),
            force_active_checks_on_start: 0,
            mailbox_capacity: default_mailbox_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            time_skew_tolerance_secs: default_time_skew_tolerance_secs(),
            passive_cleanup_interval_secs: default_passive_cleanup_interval_secs(),
            aliases: Vec::new(),
            key_access: Vec::new(),
            plugins: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=30).contains(&self.timeout_secs) {
            return Err("timeout_secs must be between 1 and 30".into());
        }
        if self.default_capacity == 0 {
            return Err("default_capacity must be greater than 0".into());
        }
        if self.default_max_capacity == 0 {
            return Err("default_max_capacity must be greater than 0".into());
        }
        if self.mailbox_capacity == 0 {
            return Err("mailbox_capacity must be greater than 0".into());
        }
        if self.shutdown_timeout_secs == 0 {
            return Err("shutdown_timeout_secs must be greater than 0".into());
        }
        if self.time_skew_tolerance_secs == 0 {
            return Err("time_skew_tolerance_secs must be greater than 0".into());
        }
        if self.passive_cleanup_interval_secs == 0 {
            return Err("passive_cleanup_interval_secs must be greater than 0".into());
        }
        if !(-1..=1).contains(&self.force_active_checks_on_start) {
            return Err("force_active_checks_on_start must be -1, 0 or 1".into());
        }
        for (name, plugin) in &self.plugins {
            if let Some(flag) = plugin.system.force_active_checks_on_start {
                if !(-1..=1).contains(&flag) {
                    return Err(format!(
                        "plugin `{name}` invalid: force_active_checks_on_start must be -1, 0 or 1"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns parse or validation failures.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, parsed or validated.
    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration file {}", path.display()))?;
        Self::from_json_str(&input)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid configuration file {}", path.display()))
    }

    /// Options given to every configurator.
    #[must_use]
    pub fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            timeout_secs: self.timeout_secs,
            source_ip: self.source_ip.clone(),
        }
    }

    /// Settings of a plugin; names match case-insensitively.
    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<&PluginOptions> {
        self.plugins.get(name).or_else(|| {
            self.plugins
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, options)| options)
        })
    }
}

/// Resolves the capacity of a plugin.
///
/// The ceiling is the plugin's registered maximum when positive, else the
/// default maximum. The capacity is the configured value when positive, else
/// the default, clamped to the ceiling.
#[must_use]
pub fn get_plugin_capacity(
    system_capacity: u32,
    default_capacity: u32,
    plugin_max_capacity: u32,
    default_max_capacity: u32,
    name: &str,
) -> u32 {
    let max = if plugin_max_capacity > 0 {
        plugin_max_capacity
    } else {
        default_max_capacity
    };
    let capacity = if system_capacity > 0 {
        system_capacity
    } else {
        default_capacity
    };
    if capacity > max {
        tracing::warn!(
            "lowering the plugin {} capacity to {} as the configured capacity {} exceeds limits",
            name,
            max,
            capacity
        );
        return max;
    }
    capacity
}

/// Resolves the force-active-checks-on-start flag of a plugin.
#[must_use]
pub fn get_plugin_force_active_checks(plugin_value: Option<i32>, global_value: i32) -> bool {
    match plugin_value {
        Some(value) => value == 1,
        None => global_value == 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_resolution() {
        let cases = [
            (50, 1000, 100, 1000, 50),
            (150, 1000, 100, 1000, 100),
            (1500, 1000, 0, 1000, 1000),
            (1500, 1000, 2000, 1000, 1500),
            (2500, 1000, 2000, 1000, 2000),
            (0, 1000, 2000, 1000, 1000),
        ];
        for (system, default, max, default_max, expected) in cases {
            assert_eq!(
                get_plugin_capacity(system, default, max, default_max, "test"),
                expected,
                "system={system} max={max}"
            );
        }
    }

    #[test]
    fn force_active_checks_resolution() {
        assert!(get_plugin_force_active_checks(Some(1), 0));
        assert!(!get_plugin_force_active_checks(Some(0), 1));
        assert!(!get_plugin_force_active_checks(Some(-1), 1));
        assert!(get_plugin_force_active_checks(None, 1));
        assert!(!get_plugin_force_active_checks(None, 0));
    }

    #[test]
    fn plugin_lookup_ignores_case() {
        let cfg = SchedulerConfig::from_json_str(
            r#"{"plugins": {"Debug1": {"system": {"capacity": 2}}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.plugin("debug1").and_then(|p| p.system.capacity), Some(2));
        assert!(cfg.plugin("debug2").is_none());
    }
}
