//! JSON messages exchanged between the controller and workers.

use serde::{Deserialize, Serialize};

use quakerun_core::{Operation, Payload, WorkerStatus};

// ============================================================================
// Task execution
// ============================================================================

/// Body of `POST /v1/execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub task_id: String,
    pub attempt: u32,
    pub operation: Operation,
    pub group_id: u32,
    pub seed: u64,
    pub payload: Payload,
}

/// Outcome reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireStatus {
    Success,
    Failure,
}

/// Response of `POST /v1/execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub task_id: String,
    pub attempt: u32,
    pub status: WireStatus,

    /// Error message when `status` is `failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Seconds.
    pub duration: f64,
    pub peak_memory_mb: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,

    #[serde(default)]
    pub payload: Payload,
}

/// Response of `GET /v1/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub worker_id: String,
    pub status: String,
    /// Task currently running, if any.
    #[serde(default)]
    pub running_task: Option<String>,
}

impl HealthResponse {
    pub const IDLE: &'static str = "idle";
    pub const BUSY: &'static str = "busy";

    pub fn idle(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: Self::IDLE.to_string(),
            running_task: None,
        }
    }

    pub fn busy(worker_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: Self::BUSY.to_string(),
            running_task: Some(task_id.into()),
        }
    }

    /// True if the worker can take a task right now.
    pub fn is_idle(&self) -> bool {
        self.status == Self::IDLE && self.running_task.is_none()
    }
}

/// Response of `POST /v1/tasks/:task_id/cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub task_id: String,
    /// True if the task was running and the cancel signal was delivered.
    pub cancelled: bool,
}

// ============================================================================
// Worker registration
// ============================================================================

/// Body of `POST /v1/workers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    /// Base URL at which the controller reaches the worker.
    pub address: String,
}

/// One worker as listed by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub address: String,
    pub status: WorkerStatus,
    /// ISO 8601.
    pub registered_at: String,
}

/// Response of `GET /v1/workers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerListResponse {
    pub workers: Vec<WorkerSummary>,
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
