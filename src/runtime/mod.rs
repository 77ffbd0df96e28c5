//! Runtime adapters and the caller-facing API.

pub mod api;
pub mod tokio_spawner;

pub use api::SchedulerHandle;
pub use tokio_spawner::TokioSpawner;

use tokio::task::JoinHandle;
use tracing::error;

use crate::core::{Manager, Spawn};

/// Runs `manager` on the current tokio runtime.
///
/// The returned join handle completes when the loop exits; a panic inside the
/// loop is logged there instead of being lost with the task.
pub fn start<S>(manager: Manager<S>) -> (SchedulerHandle, JoinHandle<()>)
where
    S: Spawn + Send + 'static,
{
    let handle = SchedulerHandle::new(manager.sender());
    let control = tokio::spawn(manager.run());
    let supervisor = tokio::spawn(async move {
        if let Err(err) = control.await {
            if err.is_panic() {
                error!("scheduler loop panicked: {}", err);
            } else {
                error!("scheduler loop cancelled: {}", err);
            }
        }
    });
    (handle, supervisor)
}
