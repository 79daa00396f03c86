//! Worker handle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{WorkerId, WorkerStatus};

/// A network-addressable endpoint representing one worker process.
///
/// The handle carries only logical registration state; the worker process
/// itself is owned by whatever orchestrates the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHandle {
    /// Unique worker identifier.
    pub worker_id: WorkerId,

    /// Base URL of the worker's endpoint (e.g. `http://10.0.0.7:1909`).
    pub address: String,

    /// Current status in the pool.
    pub status: WorkerStatus,

    /// When the worker was first registered.
    pub registered_at: DateTime<Utc>,
}

impl WorkerHandle {
    /// Create a new, idle WorkerHandle.
    pub fn new(worker_id: impl Into<WorkerId>, address: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            address: address.into(),
            status: WorkerStatus::Idle,
            registered_at: Utc::now(),
        }
    }

    /// Join a path onto the worker's base address.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.address.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
