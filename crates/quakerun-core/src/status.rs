//! Status enums for Tasks and Workers.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a Task inside the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task queued, waiting for an idle worker.
    #[default]
    Pending,
    /// Task has exactly one in-flight attempt.
    Running,
    /// A successful result was absorbed.
    Completed,
    /// Retry budget exhausted.
    Failed,
    /// Task was cancelled by the submitter.
    Cancelled,
}

impl TaskState {
    /// Returns true if the task will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of a Worker as seen by the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Worker is registered and free to take a task.
    #[default]
    Idle,
    /// Worker is executing exactly one task.
    Busy,
    /// Worker missed a deadline or a probe; excluded from selection.
    Unreachable,
}

impl WorkerStatus {
    /// Returns true if the worker can accept a task right now.
    pub fn can_accept_tasks(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the worker is believed to be alive.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Unreachable)
    }
}
