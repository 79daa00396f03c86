//! Liveness prober for unreachable workers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::pool::WorkerPool;
use crate::transport::WorkerTransport;

/// Periodically probes workers marked unreachable.
///
/// A worker that answers and reports itself idle returns to `Idle`. One
/// that answers but is still running a task stays excluded. A worker that
/// keeps failing is evicted by the pool once its threshold is reached.
pub struct LivenessProber {
    pool: Arc<WorkerPool>,
    transport: Arc<dyn WorkerTransport>,
    interval: Duration,
}

impl LivenessProber {
    pub fn new(pool: Arc<WorkerPool>, transport: Arc<dyn WorkerTransport>, config: &Config) -> Self {
        Self {
            pool,
            transport,
            interval: config.probe_interval,
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Liveness prober stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.probe_round().await;
        }
    }

    /// Probe every unreachable worker once.
    pub async fn probe_round(&self) {
        for worker in self.pool.unreachable_workers().await {
            match self.transport.probe(&worker).await {
                Ok(health) if health.is_idle() => {
                    self.pool.restore(&worker.worker_id).await;
                }
                Ok(health) => debug!(
                    worker_id = %worker.worker_id,
                    running = ?health.running_task,
                    "Worker answers but is still busy"
                ),
                Err(e) => {
                    if self.pool.record_probe_failure(&worker.worker_id).await {
                        info!(
                            worker_id = %worker.worker_id,
                            error = %e,
                            "Worker deregistered - not answering probes"
                        );
                    }
                }
            }
        }
    }
}
