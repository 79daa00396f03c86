//! Worker wire contract for QuakeRun.
//!
//! This crate contains:
//! - JSON request/response messages exchanged between controller and workers
//! - The HTTP paths both sides agree on
//! - Converters between wire messages and domain types

pub mod convert;
pub mod wire;

/// HTTP paths served by workers and by the controller.
pub mod paths {
    /// Worker: run one task attempt.
    pub const EXECUTE: &str = "/v1/execute";
    /// Worker: liveness probe.
    pub const HEALTH: &str = "/v1/health";
    /// Worker: best-effort cancellation (axum route syntax).
    pub const CANCEL: &str = "/v1/tasks/:task_id/cancel";
    /// Controller: worker registration and listing.
    pub const WORKERS: &str = "/v1/workers";

    /// Cancellation path for a concrete task id.
    pub fn cancel(task_id: &str) -> String {
        CANCEL.replace(":task_id", task_id)
    }
}

// Re-export commonly used types
pub use wire::{
    CancelResponse, ErrorResponse, ExecuteRequest, ExecuteResponse, HealthResponse,
    RegisterWorkerRequest, WireStatus, WorkerListResponse, WorkerSummary,
};
