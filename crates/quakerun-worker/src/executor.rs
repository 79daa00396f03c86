//! Task execution.
//!
//! The science inside a task is opaque to QuakeRun; what matters here is
//! its cost profile. [`SimulatedExecutor`] reproduces that profile: work
//! proportional to the block weight, one timing record per source, and
//! reproducible jitter driven by the task seed.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quakerun_core::{Operation, Payload, SourceSpec, SourceTiming, TaskOutput};
use quakerun_proto::ExecuteRequest;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Task cancelled")]
    Cancelled,
}

/// Runs one task and produces its output payload.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> Result<Payload, ExecutorError>;
}

/// Summary returned by `read_source_model`.
#[derive(Debug, Serialize)]
struct SourceModelSummary {
    num_sources: usize,
    num_ruptures: u64,
    total_weight: u64,
}

/// Ceiling on the simulated time spent on one source.
const MAX_SOURCE_COST: Duration = Duration::from_secs(3600);

/// Non-negative, finite seconds as a duration, saturating at
/// [`MAX_SOURCE_COST`]. NaN and negative values count as zero.
fn clamped_secs(secs: f64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => d.min(MAX_SOURCE_COST),
        Err(_) if secs > 0.0 => MAX_SOURCE_COST,
        Err(_) => Duration::ZERO,
    }
}

/// Executor that models the cost of hazard tasks without computing them.
pub struct SimulatedExecutor {
    cost_per_rupture: Duration,
}

impl SimulatedExecutor {
    pub fn new(cost_per_rupture_ms: f64) -> Self {
        Self {
            cost_per_rupture: clamped_secs(cost_per_rupture_ms / 1000.0),
        }
    }

    fn events_for(operation: Operation, source: &SourceSpec, rng: &mut StdRng) -> u64 {
        match operation {
            Operation::BuildRuptures | Operation::ComputeGmfs => {
                // Roughly one event per ten ruptures.
                (0..source.num_ruptures / 10).filter(|_| rng.gen_bool(0.9)).count() as u64
            }
            _ => 0,
        }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(
        &self,
        request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> Result<Payload, ExecutorError> {
        let sources: Vec<SourceSpec> = request
            .payload
            .decode_json()
            .map_err(|e| ExecutorError::InvalidPayload(e.to_string()))?;

        if request.operation == Operation::ReadSourceModel {
            let summary = SourceModelSummary {
                num_sources: sources.len(),
                num_ruptures: sources.iter().map(|s| s.num_ruptures).sum(),
                total_weight: sources.iter().map(SourceSpec::weight).sum(),
            };
            return Payload::from_json(&summary)
                .map_err(|e| ExecutorError::InvalidPayload(e.to_string()));
        }

        let mut rng = StdRng::seed_from_u64(request.seed);
        let mut output = TaskOutput::default();
        let mut eff_ruptures = 0u64;

        for source in &sources {
            let jitter: f64 = rng.gen_range(0.8..1.2);
            let cost =
                clamped_secs(self.cost_per_rupture.as_secs_f64() * source.weight() as f64 * jitter);

            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                _ = tokio::time::sleep(cost) => {}
            }

            output.source_timings.push(SourceTiming {
                source_id: source.source_id.clone(),
                code: source.code,
                num_sites: rng.gen_range(1..=100),
                calc_time: cost.as_secs_f64(),
                events: Self::events_for(request.operation, source, &mut rng),
            });
            eff_ruptures += source.num_ruptures;
        }

        output.eff_ruptures = BTreeMap::from([(request.group_id, eff_ruptures)]);
        debug!(
            task_id = %request.task_id,
            sources = sources.len(),
            eff_ruptures,
            "Simulated task finished"
        );

        Payload::from_json(&output).map_err(|e| ExecutorError::InvalidPayload(e.to_string()))
    }
}
