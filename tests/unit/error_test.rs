//! Tests for error types

use prometheus_agent_scheduler::core::{PluginError, SchedulerError};

#[test]
fn test_unknown_metric_error() {
    let err = SchedulerError::UnknownMetric("system.cpu".to_string());
    assert_eq!(format!("{}", err), "Unknown metric system.cpu");
}

#[test]
fn test_access_denied_looks_like_unknown_metric() {
    let denied = SchedulerError::AccessDenied("system.run".to_string());
    let unknown = SchedulerError::UnknownMetric("system.run".to_string());
    assert_eq!(denied.to_string(), unknown.to_string());
}

#[test]
fn test_no_data_error() {
    assert_eq!(
        SchedulerError::NoData.to_string(),
        "Timeout occurred while gathering data."
    );
}

#[test]
fn test_shutting_down_error() {
    assert_eq!(
        SchedulerError::ShuttingDown.to_string(),
        "Cannot obtain item value during shutdown process."
    );
}

#[test]
fn test_duplicate_item_error() {
    assert_eq!(SchedulerError::DuplicateItem(42).to_string(), "duplicate itemid 42 found");
}

#[test]
fn test_plugin_error_is_transparent() {
    let err: SchedulerError = PluginError::Failed("cannot open /proc/stat".into()).into();
    assert_eq!(err.to_string(), "cannot open /proc/stat");
    assert_eq!(
        SchedulerError::from(PluginError::UnsupportedMetric).to_string(),
        "Unsupported item key."
    );
}

#[test]
fn test_anyhow_interop() {
    let result: prometheus_agent_scheduler::core::AppResult<()> =
        Err(SchedulerError::Config("bad".into()).into());
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "invalid configuration: bad");
    assert!(err.downcast_ref::<SchedulerError>().is_some());
}
