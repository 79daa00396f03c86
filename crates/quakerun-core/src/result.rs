//! Per-attempt task results.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Operation, Payload, TaskId, WorkerId};

/// Why a single task attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// The worker could not be contacted (connection refused, reset, ...).
    WorkerUnreachable(String),
    /// No result arrived before the deadline.
    Timeout,
    /// The worker ran the task and reported an error.
    Execution(String),
    /// The submitter cancelled the task.
    Cancelled,
}

impl FailureReason {
    /// Returns true if the failure is attributed to the worker rather than
    /// to the task itself.
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, Self::WorkerUnreachable(_) | Self::Timeout)
    }

    /// Returns true if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerUnreachable(msg) => write!(f, "worker unreachable: {msg}"),
            Self::Timeout => f.write_str("task timed out"),
            Self::Execution(msg) => write!(f, "execution failed: {msg}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure(FailureReason),
}

/// The result of one task attempt, with its resource accounting.
///
/// Produced exactly once per attempt; retries of the same task produce new
/// results with a higher `attempt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,

    /// 1-based attempt number.
    pub attempt: u32,

    /// Worker that ran (or was supposed to run) the attempt.
    pub worker_id: WorkerId,

    pub operation: Operation,

    pub status: ResultStatus,

    /// Wall-clock duration in seconds.
    pub duration: f64,

    /// Peak resident memory during the attempt, in megabytes.
    pub peak_memory_mb: f64,

    /// Bytes sent by the worker (the result payload).
    pub bytes_sent: u64,

    /// Bytes received by the worker (the task payload).
    pub bytes_received: u64,

    pub payload: Payload,
}

impl TaskResult {
    /// A failed attempt with no resource figures other than elapsed time.
    ///
    /// Used for failures the controller observes itself (timeouts,
    /// unreachable workers) where the worker never reported back.
    pub fn failure(
        task_id: TaskId,
        attempt: u32,
        worker_id: WorkerId,
        operation: Operation,
        reason: FailureReason,
        duration: f64,
    ) -> Self {
        Self {
            task_id,
            attempt,
            worker_id,
            operation,
            status: ResultStatus::Failure(reason),
            duration,
            peak_memory_mb: 0.0,
            bytes_sent: 0,
            bytes_received: 0,
            payload: Payload::empty(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ResultStatus::Success)
    }

    /// The failure reason, if this attempt failed.
    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.status {
            ResultStatus::Success => None,
            ResultStatus::Failure(reason) => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_fault_classification() {
        assert!(FailureReason::Timeout.is_worker_fault());
        assert!(FailureReason::WorkerUnreachable("refused".into()).is_worker_fault());
        assert!(!FailureReason::Execution("bad payload".into()).is_worker_fault());
        assert!(!FailureReason::Cancelled.is_retryable());
    }

    #[test]
    fn test_failure_result() {
        let result = TaskResult::failure(
            TaskId::new("t"),
            2,
            WorkerId::new("w"),
            Operation::Preclassical,
            FailureReason::Timeout,
            30.0,
        );
        assert!(!result.is_success());
        assert_eq!(result.failure_reason(), Some(&FailureReason::Timeout));
        assert_eq!(result.bytes_sent, 0);
    }

    #[test]
    fn test_failure_reason_serialization() {
        let json = serde_json::to_value(FailureReason::Execution("boom".into())).unwrap();
        assert_eq!(json["kind"], "execution");
        assert_eq!(json["message"], "boom");
    }
}
