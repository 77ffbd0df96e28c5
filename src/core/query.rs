//! Text rendering of administrative queries.

use std::fmt::Write as _;

use crate::core::message::Query;
use crate::core::plugin_agent::{PluginAgent, PluginMap};
use crate::core::SchedulerError;

/// Answers `query` from the current plugin state.
///
/// # Errors
///
/// [`SchedulerError::UnknownQuery`] for unsupported commands.
pub fn process_query(plugins: &PluginMap, query: &Query) -> Result<String, SchedulerError> {
    match query {
        Query::Command(command) => match command.trim() {
            "metrics" => Ok(render_metrics(plugins)),
            "status" => Ok(render_status(plugins)),
            other => Err(SchedulerError::UnknownQuery(other.to_string())),
        },
        Query::UserParameters => Ok(render_user_parameters(plugins)),
    }
}

/// Every served metric key, sorted, one per line.
#[must_use]
pub fn render_metrics(plugins: &PluginMap) -> String {
    let mut keys: Vec<&str> = plugins
        .values()
        .flat_map(|agent| agent.metrics().iter().map(|m| m.key.as_str()))
        .collect();
    keys.sort_unstable();
    let mut out = String::new();
    for key in keys {
        out.push_str(key);
        out.push('\n');
    }
    out
}

/// Per-plugin activity and capacity report.
#[must_use]
pub fn render_status(plugins: &PluginMap) -> String {
    let mut out = String::new();
    for agent in sorted(plugins) {
        let _ = writeln!(out, "[{}]", agent.name());
        let _ = writeln!(out, "active: {}", agent.is_active());
        let _ = writeln!(out, "capacity: {}/{}", agent.used_capacity(), agent.max_capacity());
        let _ = writeln!(out, "check on start: {}", u8::from(agent.force_active_checks_on_start()));
        let _ = writeln!(out, "tasks: {}", agent.queued_len());
        out.push('\n');
    }
    out
}

/// `key: description` lines of user-parameter metrics.
#[must_use]
pub fn render_user_parameters(plugins: &PluginMap) -> String {
    let mut lines: Vec<String> = sorted(plugins)
        .into_iter()
        .filter(|agent| agent.is_user_parameter())
        .flat_map(|agent| {
            agent
                .metrics()
                .iter()
                .map(|m| format!("{}: {}", m.key, m.description))
        })
        .collect();
    lines.sort();
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn sorted(plugins: &PluginMap) -> Vec<&PluginAgent> {
    let mut agents: Vec<&PluginAgent> = plugins.values().collect();
    agents.sort_by(|a, b| a.name().cmp(b.name()));
    agents
}
