//! QuakeRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Async runtime specifics
//!
//! All types here describe the task distribution and execution-accounting
//! domain: tasks, worker handles, per-attempt results, duration statistics
//! and the composite report.

pub mod error;
pub mod ids;
pub mod output;
pub mod payload;
pub mod plan;
pub mod report;
pub mod result;
pub mod stats;
pub mod status;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{TaskId, WorkerId};
pub use output::{SourceSpec, SourceTiming, TaskOutput};
pub use payload::Payload;
pub use plan::{block_splitter, max_weight, plan_tasks, SourceGroup};
pub use report::{CompositeReport, SourceInfo, TransferStats};
pub use result::{FailureReason, ResultStatus, TaskResult};
pub use stats::{OperationStats, RunningStats};
pub use status::{TaskState, WorkerStatus};
pub use task::{Operation, Task};
pub use worker::WorkerHandle;
