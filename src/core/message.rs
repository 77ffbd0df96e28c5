//! Messages accepted by the scheduler control loop.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::core::executor::Completion;
use crate::core::output::ResultWriter;
use crate::core::registry::PluginRegistration;
use crate::core::rules::GlobalExpression;
use crate::core::SchedulerError;

/// One item requested by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Item identifier.
    pub itemid: u64,
    /// Item key, possibly an alias.
    pub key: String,
    /// Delay specification, unused by one-shot checks.
    #[serde(default)]
    pub delay: String,
    /// Last processed log size.
    #[serde(default)]
    pub last_logsize: Option<u64>,
    /// Last seen modification time.
    #[serde(default)]
    pub mtime: Option<i32>,
    /// Item timeout (`3`, `3s`, `1m`), the configured default when unset.
    #[serde(default)]
    pub timeout: Option<String>,
}

impl Request {
    /// Request for `key` with `delay`.
    pub fn new(itemid: u64, key: impl Into<String>, delay: impl Into<String>) -> Self {
        Self {
            itemid,
            key: key.into(),
            delay: delay.into(),
            last_logsize: None,
            mtime: None,
            timeout: None,
        }
    }
}

/// Complete item set of one client.
#[derive(Clone)]
pub struct UpdateRequest {
    /// Requesting client.
    pub client_id: u64,
    /// Where results go.
    pub sink: Arc<dyn ResultWriter>,
    /// False until the client's item set has been refreshed once.
    pub first_active_checks_refreshed: bool,
    /// Global regular expressions sent with the item set.
    pub rules: Vec<GlobalExpression>,
    /// Requested items.
    pub requests: Vec<Request>,
    /// Receive time, stamped by the control loop.
    pub now: DateTime<Utc>,
}

impl fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRequest")
            .field("client_id", &self.client_id)
            .field("first_active_checks_refreshed", &self.first_active_checks_refreshed)
            .field("rules", &self.rules.len())
            .field("requests", &self.requests)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

/// Administrative query commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Textual command such as `metrics` or `status`.
    Command(String),
    /// User-parameter metrics with descriptions.
    UserParameters,
}

/// Control loop mailbox message.
#[derive(Debug)]
pub enum Message {
    /// New item set of a client.
    Update(UpdateRequest),
    /// A dispatched task finished.
    Finished(Completion),
    /// Administrative query with its reply channel.
    Query {
        /// What is asked.
        query: Query,
        /// Reply channel.
        reply: oneshot::Sender<Result<String, SchedulerError>>,
    },
    /// Replace all user-parameter plugins.
    ReloadUserParameters {
        /// New user-parameter plugins.
        registrations: Vec<PluginRegistration>,
        /// Reply channel.
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    /// Begin shutdown.
    Stop,
}
