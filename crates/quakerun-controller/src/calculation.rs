//! Driving one calculation stage end to end.

use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use quakerun_core::{CompositeReport, Task, TaskId};

use crate::dispatcher::{DispatchError, TaskOutcome, TaskTicket};
use crate::pool::WorkerPool;
use crate::state::AppState;

/// Pause before resubmitting when the queue is full and none of our own
/// tasks is outstanding.
const EXHAUSTED_BACKOFF: Duration = Duration::from_millis(50);

/// Submit `tasks`, wait for every outcome and return the composite report.
///
/// A full queue is waited out by collecting outcomes of tasks already
/// submitted. Permanently failed tasks do not abort the run; they leave the
/// report flagged incomplete. Any other submission error cancels what was
/// already submitted.
pub async fn run_calculation(
    state: &AppState,
    tasks: Vec<Task>,
) -> Result<CompositeReport, DispatchError> {
    let started = Instant::now();
    state.assembler.expect(tasks.len());

    let mut outstanding = FuturesUnordered::new();
    let mut outcomes = Vec::with_capacity(tasks.len());

    for task in tasks {
        loop {
            match state.dispatcher.submit(task.clone()).await {
                Ok(ticket) => {
                    outstanding.push(ticket);
                    break;
                }
                Err(DispatchError::PoolExhausted { pending }) => {
                    debug!(pending, "Queue full - waiting for a task to settle");
                    match outstanding.next().await {
                        Some(outcome) => outcomes.push(outcome),
                        None => tokio::time::sleep(EXHAUSTED_BACKOFF).await,
                    }
                }
                Err(e) => {
                    cancel_outstanding(state, &outstanding).await;
                    return Err(e);
                }
            }
        }
    }
    while let Some(outcome) = outstanding.next().await {
        outcomes.push(outcome);
    }

    let mut failed = 0usize;
    for outcome in &outcomes {
        match outcome {
            TaskOutcome::Completed(_) => {}
            TaskOutcome::Failed {
                task_id,
                attempts,
                reason,
            } => {
                failed += 1;
                warn!(task_id = %task_id, attempts, reason = %reason, "Task gave up");
            }
            TaskOutcome::Cancelled { task_id } => {
                warn!(task_id = %task_id, "Task cancelled");
            }
        }
    }

    info!(
        tasks = outcomes.len(),
        failed,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Calculation finished"
    );
    Ok(state.assembler.finalize())
}

async fn cancel_outstanding(state: &AppState, outstanding: &FuturesUnordered<TaskTicket>) {
    let task_ids: Vec<TaskId> = outstanding.iter().map(|t| t.task_id().clone()).collect();
    for task_id in &task_ids {
        if let Err(e) = state.dispatcher.cancel(task_id).await {
            debug!(task_id = %task_id, error = %e, "Nothing to cancel");
        }
    }
    warn!(tasks = task_ids.len(), "Calculation aborted - submitted tasks cancelled");
}

/// Wait until at least `min_workers` are registered, or `timeout` passes.
///
/// Returns the number of registered workers at the end.
pub async fn wait_for_workers(pool: &WorkerPool, min_workers: usize, timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    loop {
        let n = pool.len().await;
        if n >= min_workers || Instant::now() >= deadline {
            return n;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
