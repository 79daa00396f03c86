//! Execution metrics - per-operation duration statistics and Prometheus
//! formatting.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};

use quakerun_core::{Operation, OperationStats, RunningStats, TaskResult, WorkerStatus};

use crate::dispatcher::ResultSink;
use crate::state::AppState;

#[derive(Default)]
struct OperationAccum {
    durations: RunningStats,
    max_memory_mb: f64,
    failures: u64,
}

/// Folds task results into per-operation statistics.
///
/// Only successful attempts contribute durations; failed attempts are
/// counted separately.
#[derive(Default)]
pub struct MetricsAggregator {
    operations: Mutex<HashMap<Operation, OperationAccum>>,
}

impl MetricsAggregator {
    /// Create an empty aggregator wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, result: &TaskResult) {
        let mut ops = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let accum = ops.entry(result.operation).or_default();

        if result.is_success() {
            accum.durations.push(result.duration);
            accum.max_memory_mb = accum.max_memory_mb.max(result.peak_memory_mb);
        } else {
            accum.failures += 1;
        }
    }

    /// Current statistics for every operation seen so far.
    pub fn snapshot(&self) -> BTreeMap<Operation, OperationStats> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(op, accum)| {
                (
                    *op,
                    OperationStats::from_running(
                        &accum.durations,
                        accum.max_memory_mb,
                        accum.failures,
                    ),
                )
            })
            .collect()
    }

    /// Format the snapshot in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        write_family(
            &mut output,
            "quakerun_task_duration_seconds_count",
            "counter",
            "Successful task attempts by operation",
            snapshot.iter().map(|(op, s)| (*op, s.count as f64)),
        );
        write_family(
            &mut output,
            "quakerun_task_duration_seconds_sum",
            "counter",
            "Total successful task time by operation",
            snapshot.iter().map(|(op, s)| (*op, s.total)),
        );
        write_family(
            &mut output,
            "quakerun_task_duration_seconds_mean",
            "gauge",
            "Mean task duration by operation",
            snapshot.iter().map(|(op, s)| (*op, s.mean)),
        );
        write_family(
            &mut output,
            "quakerun_task_duration_seconds_stddev",
            "gauge",
            "Sample standard deviation of task duration (NaN below two samples)",
            snapshot.iter().map(|(op, s)| (*op, s.stddev)),
        );
        write_family(
            &mut output,
            "quakerun_task_duration_seconds_min",
            "gauge",
            "Fastest task duration by operation",
            snapshot.iter().map(|(op, s)| (*op, s.min)),
        );
        write_family(
            &mut output,
            "quakerun_task_duration_seconds_max",
            "gauge",
            "Slowest task duration by operation",
            snapshot.iter().map(|(op, s)| (*op, s.max)),
        );
        write_family(
            &mut output,
            "quakerun_task_peak_memory_mb",
            "gauge",
            "Largest reported peak memory by operation",
            snapshot.iter().map(|(op, s)| (*op, s.max_memory_mb)),
        );
        write_family(
            &mut output,
            "quakerun_task_failures_total",
            "counter",
            "Failed task attempts by operation",
            snapshot.iter().map(|(op, s)| (*op, s.failures as f64)),
        );

        output
    }
}

impl ResultSink for MetricsAggregator {
    fn record(&self, result: &TaskResult) {
        MetricsAggregator::record(self, result);
    }
}

fn write_family(
    output: &mut String,
    name: &str,
    kind: &str,
    help: &str,
    samples: impl Iterator<Item = (Operation, f64)>,
) {
    writeln!(output, "# HELP {name} {help}").ok();
    writeln!(output, "# TYPE {name} {kind}").ok();
    for (op, value) in samples {
        writeln!(output, "{name}{{operation=\"{op}\"}} {value}").ok();
    }
}

/// Collect pool, queue and operation metrics as Prometheus text.
pub async fn collect_metrics(state: &AppState) -> String {
    let mut output = String::new();

    collect_worker_metrics(state, &mut output).await;
    collect_queue_metrics(state, &mut output).await;
    output.push_str(&state.metrics.render_prometheus());

    output
}

/// Collect worker metrics by status.
async fn collect_worker_metrics(state: &AppState, output: &mut String) {
    let mut idle = 0u64;
    let mut busy = 0u64;
    let mut unreachable = 0u64;

    for worker in state.pool.list().await {
        match worker.status {
            WorkerStatus::Idle => idle += 1,
            WorkerStatus::Busy => busy += 1,
            WorkerStatus::Unreachable => unreachable += 1,
        }
    }

    writeln!(
        output,
        "# HELP quakerun_workers Number of registered workers by status"
    )
    .ok();
    writeln!(output, "# TYPE quakerun_workers gauge").ok();
    writeln!(output, "quakerun_workers{{status=\"idle\"}} {idle}").ok();
    writeln!(output, "quakerun_workers{{status=\"busy\"}} {busy}").ok();
    writeln!(
        output,
        "quakerun_workers{{status=\"unreachable\"}} {unreachable}"
    )
    .ok();
}

/// Collect dispatch queue gauges.
async fn collect_queue_metrics(state: &AppState, output: &mut String) {
    let pending = state.dispatcher.pending_len().await;
    let running = state.dispatcher.in_flight_len().await;

    writeln!(output, "# HELP quakerun_tasks Number of live tasks by state").ok();
    writeln!(output, "# TYPE quakerun_tasks gauge").ok();
    writeln!(output, "quakerun_tasks{{state=\"pending\"}} {pending}").ok();
    writeln!(output, "quakerun_tasks{{state=\"running\"}} {running}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use quakerun_core::{FailureReason, Payload, ResultStatus, TaskId, WorkerId};

    fn result(op: Operation, duration: f64, status: ResultStatus) -> TaskResult {
        TaskResult {
            task_id: TaskId::generate(),
            attempt: 1,
            worker_id: WorkerId::new("w1"),
            operation: op,
            status,
            duration,
            peak_memory_mb: 12.5,
            bytes_sent: 0,
            bytes_received: 0,
            payload: Payload::empty(),
        }
    }

    #[test]
    fn test_single_sample_per_operation() {
        let metrics = MetricsAggregator::new();
        metrics.record(&result(Operation::ReadSourceModel, 0.00136, ResultStatus::Success));
        metrics.record(&result(Operation::Preclassical, 0.0005536, ResultStatus::Success));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);

        let read = &snapshot[&Operation::ReadSourceModel];
        assert_eq!(read.count, 1);
        assert_eq!(read.mean, 0.00136);
        assert!(read.stddev.is_nan());

        let pre = &snapshot[&Operation::Preclassical];
        assert_eq!(pre.count, 1);
        assert_eq!(pre.mean, 0.0005536);
        assert!(pre.stddev.is_nan());
        assert!(!pre.has_variance());
    }

    #[test]
    fn test_mean_and_extremes() {
        let metrics = MetricsAggregator::new();
        for d in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            metrics.record(&result(Operation::Classical, d, ResultStatus::Success));
        }

        let stats = &metrics.snapshot()[&Operation::Classical];
        assert_eq!(stats.count, 8);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert!((stats.total - 40.0).abs() < 1e-12);
        // sample variance = 32 / 7
        assert!((stats.stddev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_failures_do_not_touch_durations() {
        let metrics = MetricsAggregator::new();
        metrics.record(&result(Operation::ComputeGmfs, 1.0, ResultStatus::Success));
        metrics.record(&result(
            Operation::ComputeGmfs,
            30.0,
            ResultStatus::Failure(FailureReason::Timeout),
        ));

        let stats = &metrics.snapshot()[&Operation::ComputeGmfs];
        assert_eq!(stats.count, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.max, 1.0);
        assert_eq!(stats.max_memory_mb, 12.5);
    }

    #[test]
    fn test_only_failures_gives_nan_summary() {
        let metrics = MetricsAggregator::new();
        metrics.record(&result(
            Operation::BuildRuptures,
            0.1,
            ResultStatus::Failure(FailureReason::Execution("boom".into())),
        ));

        let stats = &metrics.snapshot()[&Operation::BuildRuptures];
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_nan());
        assert_eq!(stats.failures, 1);

        let json = serde_json::to_value(stats).unwrap();
        assert!(json["mean"].is_null());
        assert!(json["stddev"].is_null());
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = MetricsAggregator::new();
        metrics.record(&result(Operation::Preclassical, 0.5, ResultStatus::Success));

        let output = metrics.render_prometheus();

        assert!(output.contains("# TYPE quakerun_task_duration_seconds_count counter"));
        assert!(output.contains("quakerun_task_duration_seconds_count{operation=\"preclassical\"} 1"));
        assert!(output.contains("quakerun_task_duration_seconds_sum{operation=\"preclassical\"} 0.5"));
        assert!(output.contains("quakerun_task_duration_seconds_stddev{operation=\"preclassical\"} NaN"));
        assert!(output.contains("quakerun_task_failures_total{operation=\"preclassical\"} 0"));
    }
}
