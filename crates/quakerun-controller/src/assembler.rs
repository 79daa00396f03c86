//! Result assembler - merges per-task outputs into the composite report.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use quakerun_core::{
    CompositeReport, FailureReason, Operation, SourceInfo, Task, TaskId, TaskOutput, TaskResult,
    TransferStats,
};

use crate::dispatcher::ResultSink;
use crate::metrics::MetricsAggregator;

#[derive(Default)]
struct AssemblerState {
    expected: usize,
    completed: HashSet<TaskId>,
    failed: Vec<TaskId>,
    sources: HashMap<String, SourceInfo>,
    transfer: BTreeMap<Operation, TransferStats>,
    eff_ruptures: BTreeMap<u32, u64>,
}

/// Accumulates task results into a [`CompositeReport`].
pub struct ResultAssembler {
    state: Mutex<AssemblerState>,
    metrics: Arc<MetricsAggregator>,
    top_k: usize,
}

impl ResultAssembler {
    /// Create an assembler reporting the `top_k` slowest sources.
    pub fn new(metrics: Arc<MetricsAggregator>, top_k: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AssemblerState::default()),
            metrics,
            top_k,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AssemblerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announce how many tasks the report should cover.
    pub fn expect(&self, n: usize) {
        self.lock().expected = n;
    }

    /// Fold one attempt into the report.
    ///
    /// Transfer volume counts for every attempt. Source tables only take
    /// the first success of each task.
    pub fn absorb(&self, result: &TaskResult) {
        let mut state = self.lock();

        let transfer = state.transfer.entry(result.operation).or_default();
        transfer.sent += result.bytes_sent;
        transfer.received += result.bytes_received;

        if !result.is_success() || !state.completed.insert(result.task_id.clone()) {
            return;
        }

        let output: TaskOutput = match result.payload.decode_json() {
            Ok(output) => output,
            Err(e) => {
                debug!(
                    task_id = %result.task_id,
                    operation = %result.operation,
                    error = %e,
                    "Payload carries no source timings"
                );
                return;
            }
        };

        for timing in output.source_timings {
            let info = state
                .sources
                .entry(timing.source_id.clone())
                .or_insert_with(|| SourceInfo {
                    source_id: timing.source_id.clone(),
                    code: timing.code,
                    num_sites: 0,
                    calc_time: 0.0,
                    num_split: 0,
                    events: 0,
                });
            info.num_sites += timing.num_sites;
            info.calc_time += timing.calc_time;
            info.num_split += 1;
            info.events += timing.events;
        }

        for (group, n) in output.eff_ruptures {
            *state.eff_ruptures.entry(group).or_insert(0) += n;
        }
    }

    /// Record a task that will never produce a result.
    pub fn mark_failed(&self, task_id: &TaskId) {
        let mut state = self.lock();
        if !state.failed.contains(task_id) {
            state.failed.push(task_id.clone());
        }
    }

    /// Build the report from everything absorbed so far.
    pub fn finalize(&self) -> CompositeReport {
        let state = self.lock();

        let mut ranked: Vec<SourceInfo> = state.sources.values().cloned().collect();
        ranked.sort_by(|a, b| {
            b.calc_time
                .partial_cmp(&a.calc_time)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        ranked.truncate(self.top_k);

        let mut calc_time_by_code = BTreeMap::new();
        for info in state.sources.values() {
            *calc_time_by_code.entry(info.code.to_string()).or_insert(0.0) += info.calc_time;
        }

        let mut failed_tasks = state.failed.clone();
        failed_tasks.sort();

        // An empty report covers nothing, whatever was announced.
        let completed_tasks = state.completed.len();
        let complete =
            failed_tasks.is_empty() && completed_tasks > 0 && completed_tasks >= state.expected;

        CompositeReport {
            complete,
            expected_tasks: state.expected,
            completed_tasks,
            failed_tasks,
            operations: self.metrics.snapshot(),
            slowest_sources: ranked,
            calc_time_by_code,
            data_transfer: state.transfer.clone(),
            eff_ruptures: state.eff_ruptures.clone(),
        }
    }
}

impl ResultSink for ResultAssembler {
    fn record(&self, result: &TaskResult) {
        self.absorb(result);
    }

    fn task_abandoned(&self, task: &Task, _reason: &FailureReason) {
        self.mark_failed(&task.id);
    }
}
