//! Dispatch seam between the control loop and the workers running tasks.

use std::future::Future;
use std::pin::Pin;

use crate::core::task::TaskId;

/// Boxed unit of work produced for one dispatched task.
///
/// Resolves to `true` when the task delivered a value to its sink.
pub type TaskJob = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

/// Abstraction for spawning async work onto a runtime.
pub trait Spawn {
    /// Spawn a future onto the runtime.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Report a worker posts once its task has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Finished task.
    pub task: TaskId,
    /// Whether a value reached the task's sink.
    pub produced: bool,
}
