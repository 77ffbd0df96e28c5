//! Tests for configuration validation

use prometheus_agent_scheduler::config::SchedulerConfig;
use prometheus_agent_scheduler::util::{KeyAccessRule, Permission};

#[test]
fn test_scheduler_config_defaults() {
    let config = SchedulerConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.timeout_secs, 3);
    assert_eq!(config.default_capacity, 1000);
    assert_eq!(config.shutdown_timeout_secs, 5);
    assert_eq!(config.time_skew_tolerance_secs, 10);
}

#[test]
fn test_scheduler_config_from_json() {
    let config = SchedulerConfig::from_json_str(
        r#"{
            "timeout_secs": 10,
            "force_active_checks_on_start": 1,
            "aliases": ["ping:net.tcp.service[icmp]"],
            "key_access": [{"permission": "deny", "pattern": "system.run[*]"}],
            "plugins": {
                "Smart": {"system": {"capacity": 4}, "options": {"Path": "/usr/sbin/smartctl"}}
            }
        }"#,
    )
    .expect("valid config");

    assert_eq!(config.timeout_secs, 10);
    assert_eq!(config.mailbox_capacity, 10);
    assert_eq!(config.aliases.len(), 1);
    assert_eq!(config.key_access, vec![KeyAccessRule::deny("system.run[*]")]);
    assert_eq!(config.key_access[0].permission, Permission::Deny);
    let smart = config.plugin("smart").expect("plugin settings");
    assert_eq!(smart.system.capacity, Some(4));
    assert_eq!(smart.options.as_ref().and_then(|o| o["Path"].as_str()), Some("/usr/sbin/smartctl"));
    assert_eq!(config.global_options().timeout_secs, 10);
}

#[test]
fn test_scheduler_config_invalid_timeout() {
    let invalid = SchedulerConfig {
        timeout_secs: 31,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_force_flag() {
    let err = SchedulerConfig::from_json_str(r#"{"plugins": {"a": {"system": {"force_active_checks_on_start": 2}}}}"#)
        .unwrap_err();
    assert!(err.contains("plugin `a` invalid"), "{err}");
}

#[test]
fn test_scheduler_config_parse_error() {
    let err = SchedulerConfig::from_json_str("{").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_scheduler_config_from_path() {
    let path = std::env::temp_dir().join(format!("scheduler-config-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"shutdown_timeout_secs": 7}"#).unwrap();
    let config = SchedulerConfig::from_path(&path).expect("loads");
    std::fs::remove_file(&path).ok();
    assert_eq!(config.shutdown_timeout_secs, 7);

    let missing = SchedulerConfig::from_path(path.with_extension("missing"));
    assert!(missing.unwrap_err().to_string().starts_with("cannot read configuration file"));
}
