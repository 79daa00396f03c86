//! Converters between wire messages and domain types.

use crate::wire::{
    ExecuteRequest, ExecuteResponse, RegisterWorkerRequest, WireStatus, WorkerSummary,
};
use quakerun_core::{
    FailureReason, Operation, ResultStatus, Task, TaskId, TaskResult, WorkerHandle, WorkerId,
};

// ============================================================================
// Task -> ExecuteRequest
// ============================================================================

impl ExecuteRequest {
    /// Build the request for one attempt of a task.
    pub fn for_attempt(task: &Task, attempt: u32) -> Self {
        Self {
            task_id: task.id.as_str().to_string(),
            attempt,
            operation: task.operation,
            group_id: task.group_id,
            seed: task.seed,
            payload: task.payload.clone(),
        }
    }
}

// ============================================================================
// ExecuteResponse <-> TaskResult
// ============================================================================

impl ExecuteResponse {
    /// Convert into a domain result attributed to `worker_id`.
    ///
    /// The operation comes from the controller's own copy of the task, not
    /// from the worker.
    pub fn into_result(self, worker_id: WorkerId, operation: Operation) -> TaskResult {
        let status = match self.status {
            WireStatus::Success => ResultStatus::Success,
            WireStatus::Failure => ResultStatus::Failure(FailureReason::Execution(
                self.error.unwrap_or_else(|| "unspecified worker error".to_string()),
            )),
        };

        TaskResult {
            task_id: TaskId::new(self.task_id),
            attempt: self.attempt,
            worker_id,
            operation,
            status,
            duration: self.duration,
            peak_memory_mb: self.peak_memory_mb,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            payload: self.payload,
        }
    }
}

impl From<&TaskResult> for ExecuteResponse {
    fn from(result: &TaskResult) -> Self {
        let (status, error) = match &result.status {
            ResultStatus::Success => (WireStatus::Success, None),
            ResultStatus::Failure(reason) => (WireStatus::Failure, Some(reason.to_string())),
        };

        Self {
            task_id: result.task_id.as_str().to_string(),
            attempt: result.attempt,
            status,
            error,
            duration: result.duration,
            peak_memory_mb: result.peak_memory_mb,
            bytes_sent: result.bytes_sent,
            bytes_received: result.bytes_received,
            payload: result.payload.clone(),
        }
    }
}

// ============================================================================
// Worker registration
// ============================================================================

impl From<RegisterWorkerRequest> for WorkerHandle {
    fn from(req: RegisterWorkerRequest) -> Self {
        WorkerHandle::new(req.worker_id, req.address)
    }
}

impl From<&WorkerHandle> for WorkerSummary {
    fn from(handle: &WorkerHandle) -> Self {
        Self {
            worker_id: handle.worker_id.as_str().to_string(),
            address: handle.address.clone(),
            status: handle.status,
            registered_at: handle.registered_at.to_rfc3339(),
        }
    }
}
