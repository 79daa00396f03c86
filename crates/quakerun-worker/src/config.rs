//! Worker configuration.

use std::time::Duration;

use quakerun_core::WorkerId;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the execute/health/cancel endpoints listen on.
    pub bind_addr: String,

    /// Worker ID.
    pub worker_id: WorkerId,

    /// Base URL the controller uses to reach this worker.
    pub advertise_addr: String,

    /// Controller base URL; no self-registration when unset.
    pub controller_url: Option<String>,

    /// Registration refresh interval in seconds.
    pub heartbeat_interval_secs: u64,

    /// Simulated cost of one rupture-distance pair, in milliseconds.
    pub cost_per_rupture_ms: f64,
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1909".to_string(),
            worker_id: WorkerId::generate(),
            advertise_addr: "http://127.0.0.1:1909".to_string(),
            controller_url: None,
            heartbeat_interval_secs: 15,
            cost_per_rupture_ms: 0.01,
        }
    }
}
