//! Caller-facing handle of a running scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::core::{Completion, Message, PluginRegistration, Query, Request, SchedulerError, UpdateRequest};
use crate::infra::ChannelSink;
use crate::util::clock;

/// Cloneable handle posting messages to the control loop.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Message>,
}

impl SchedulerHandle {
    /// Handle over a manager's mailbox sender.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    async fn send(&self, message: Message) -> Result<(), SchedulerError> {
        self.tx.send(message).await.map_err(|_| SchedulerError::Stopped)
    }

    /// Posts the complete item set of a client.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Stopped`] when the loop is gone.
    pub async fn submit_update(&self, update: UpdateRequest) -> Result<(), SchedulerError> {
        self.send(Message::Update(update)).await
    }

    /// Reports a finished task for spawners that run jobs outside the loop's
    /// own completion path.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Stopped`] when the loop is gone.
    pub async fn notify_task_finished(&self, completion: Completion) -> Result<(), SchedulerError> {
        self.send(Message::Finished(completion)).await
    }

    /// Runs one check of `key` for a fixed client and waits up to `wait` for
    /// its value.
    ///
    /// # Errors
    ///
    /// The check's error text as [`SchedulerError::Check`],
    /// [`SchedulerError::Timeout`] when nothing arrives in time and
    /// [`SchedulerError::Stopped`] when the loop is gone.
    pub async fn perform_single(
        &self,
        client_id: u64,
        key: &str,
        timeout: Option<String>,
        wait: Duration,
    ) -> Result<String, SchedulerError> {
        let (sink, mut rx) = ChannelSink::channel(1);
        let mut request = Request::new(0, key, "");
        request.timeout = timeout;
        let update = UpdateRequest {
            client_id,
            sink: Arc::new(sink),
            first_active_checks_refreshed: false,
            rules: Vec::new(),
            requests: vec![request],
            now: clock::now(),
        };
        self.submit_update(update).await?;

        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(result)) => match (result.value, result.error) {
                (Some(value), _) => Ok(value),
                (None, Some(error)) => Err(SchedulerError::Check(error)),
                (None, None) => Err(SchedulerError::NoData),
            },
            Ok(None) => Err(SchedulerError::Stopped),
            Err(_) => {
                debug!(key, "no result within {:?}", wait);
                Err(SchedulerError::Timeout)
            }
        }
    }

    async fn query(&self, query: Query) -> Result<String, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Query { query, reply }).await?;
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Answers `metrics` or `status`.
    ///
    /// # Errors
    ///
    /// Unknown commands and a stopped loop.
    pub async fn query_status(&self, command: &str) -> Result<String, SchedulerError> {
        self.query(Query::Command(command.to_string())).await
    }

    /// Lists user-parameter metrics.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Stopped`] when the loop is gone.
    pub async fn query_user_parameters(&self) -> Result<String, SchedulerError> {
        self.query(Query::UserParameters).await
    }

    /// Replaces the user-parameter plugins.
    ///
    /// # Errors
    ///
    /// Collisions with regular plugins and a stopped loop.
    pub async fn reload_user_parameters(&self, registrations: Vec<PluginRegistration>) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::ReloadUserParameters { registrations, reply })
            .await?;
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Requests shutdown; the loop exits once running tasks are drained.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Stopped`] when the loop is already gone.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.send(Message::Stop).await
    }

    /// True once the control loop has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
