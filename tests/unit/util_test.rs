//! Tests for utility functions

use prometheus_agent_scheduler::core::SchedulerError;
use prometheus_agent_scheduler::util::{
    add_seconds, at_second, name_seed, parse_key, parse_seconds, AccessRules, AliasManager, KeyAccessRule,
};

#[test]
fn test_parse_key_with_params() {
    let (name, params) = parse_key(r#"vfs.fs.size[/,"free, in bytes",[a,b]]"#).unwrap();
    assert_eq!(name, "vfs.fs.size");
    assert_eq!(params, vec!["/", "free, in bytes", "a,b"]);
}

#[test]
fn test_parse_key_errors() {
    for key in ["", "[x]", "key[", "key[a]b", "bad key"] {
        assert!(
            matches!(parse_key(key), Err(SchedulerError::InvalidKey(_))),
            "{key} should be rejected"
        );
    }
}

#[test]
fn test_parse_seconds_suffixes() {
    assert_eq!(parse_seconds("30").unwrap(), 30);
    assert_eq!(parse_seconds("2m").unwrap(), 120);
    assert_eq!(parse_seconds("1h").unwrap(), 3600);
    assert_eq!(parse_seconds("1w").unwrap(), 604_800);
    assert!(parse_seconds("5x").is_err());
    assert!(parse_seconds("").is_err());
}

#[test]
fn test_alias_resolution() {
    let aliases = AliasManager::new(&["ping:net.tcp.service[icmp]", "cpu[*]:system.cpu.util[*]"]).unwrap();
    assert_eq!(aliases.resolve("ping"), "net.tcp.service[icmp]");
    assert_eq!(aliases.resolve("cpu[,user]"), "system.cpu.util[,user]");
    assert_eq!(aliases.resolve("other"), "other");
    assert!(AliasManager::new(&["broken"]).is_err());
}

#[test]
fn test_key_access_rules() {
    let rules = AccessRules::new(&[KeyAccessRule::allow("system.run[uptime]"), KeyAccessRule::deny("system.run[*]")])
        .unwrap();
    assert!(rules.check("system.run[uptime]"));
    assert!(!rules.check("system.run[reboot]"));
    assert!(rules.check("agent.ping"));
}

#[test]
fn test_clock_helpers() {
    let instant = at_second(100, 4);
    assert_eq!(instant.timestamp(), 100);
    assert_eq!(instant.timestamp_subsec_nanos(), 4);
    assert_eq!(add_seconds(instant, -40).timestamp(), 60);
}

#[test]
fn test_name_seed_is_stable() {
    assert_eq!(name_seed("sampler1"), 1_421_846_590);
    assert_eq!(name_seed("debug"), 1_822_771_111);
}
