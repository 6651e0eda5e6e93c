//! Task system errors

use std::time::Duration;

/// Result of a task body
pub type TaskResult = Result<(), TaskError>;

/// Task error
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task '{task}' failed: {reason}")]
    Failed { task: String, reason: String },

    #[error("Task '{task}' was canceled")]
    Canceled { task: String },

    #[error("Task '{task}' timed out after {waited:?}")]
    Timeout { task: String, waited: Duration },

    #[error("Task '{task}' is already part of this chain")]
    ChainCycle { task: String },

    #[error("Main-thread tasks can only run on the thread that created the queue")]
    NotMainThread,
}

impl TaskError {
    /// Build a failure from any displayable reason
    pub fn failed(task: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Failed {
            task: task.into(),
            reason: reason.to_string(),
        }
    }
}

/// Thread pool error
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
