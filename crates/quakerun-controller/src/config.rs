//! Controller configuration.

use std::time::Duration;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address for registration, report and metrics endpoints.
    pub bind_addr: String,

    /// Attempts per task before it is failed for good.
    pub max_retries: u32,

    /// Deadline for a single attempt.
    pub task_timeout: Duration,

    /// How often unreachable workers are re-probed.
    pub probe_interval: Duration,

    /// Consecutive probe failures before a worker is removed from the pool.
    pub probe_failure_threshold: u32,

    /// Pending tasks allowed while no worker is idle.
    pub max_queue_depth: usize,

    /// Length of the "slowest sources" ranking.
    pub top_k_sources: usize,

    /// HTTP client timeout for worker calls; longer than `task_timeout` so
    /// the dispatcher's own deadline fires first.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1908".to_string(),
            max_retries: 3,
            task_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_secs(5),
            probe_failure_threshold: 3,
            max_queue_depth: 10_000,
            top_k_sources: 10,
            request_timeout: Duration::from_secs(60),
        }
    }
}
