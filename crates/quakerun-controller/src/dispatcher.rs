//! Task dispatcher - routes queued tasks to idle workers.
//!
//! All dispatch bookkeeping (pending queue, task records, in-flight table)
//! lives in one [`DispatchState`] behind a single async mutex. Scheduling
//! cycles run whenever something may have freed capacity: a submission, a
//! settled attempt, a fired deadline, or the pool announcing an idle worker.
//! The lock order is always dispatch state first, then the pool.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quakerun_core::{
    FailureReason, Operation, ResultStatus, Task, TaskId, TaskResult, TaskState, WorkerHandle,
    WorkerId,
};
use quakerun_proto::ExecuteRequest;

use crate::config::Config;
use crate::pool::WorkerPool;
use crate::transport::{TransportError, WorkerTransport};

/// Errors surfaced to whoever submits or cancels tasks.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Pool exhausted: {pending} tasks pending and no idle worker")]
    PoolExhausted { pending: usize },

    #[error("Task already submitted: {0}")]
    DuplicateTask(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Dispatcher is shut down")]
    ShutDown,
}

/// Consumer of per-attempt results.
///
/// The dispatcher forwards every settled attempt, successful or not, except
/// those of cancelled tasks and stale duplicates.
pub trait ResultSink: Send + Sync {
    fn record(&self, result: &TaskResult);

    /// Called once when a task is failed for good.
    fn task_abandoned(&self, _task: &Task, _reason: &FailureReason) {}
}

/// Terminal outcome of a submitted task, delivered exactly once.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed(Arc<TaskResult>),
    Failed {
        task_id: TaskId,
        attempts: u32,
        reason: FailureReason,
    },
    Cancelled {
        task_id: TaskId,
    },
}

impl TaskOutcome {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskOutcome::Completed(result) => &result.task_id,
            TaskOutcome::Failed { task_id, .. } => task_id,
            TaskOutcome::Cancelled { task_id } => task_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

/// Future resolving to the outcome of one submitted task.
#[derive(Debug)]
pub struct TaskTicket {
    task_id: TaskId,
    rx: oneshot::Receiver<TaskOutcome>,
}

impl TaskTicket {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> TaskOutcome {
        self.await
    }
}

impl Future for TaskTicket {
    type Output = TaskOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(TaskOutcome::Failed {
                task_id: self.task_id.clone(),
                attempts: 0,
                reason: FailureReason::Execution("dispatcher shut down".to_string()),
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A submitted, not yet terminal task.
struct TaskEntry {
    task: Arc<Task>,
    state: TaskState,
    /// Submission order, used to keep retries ahead of later submissions.
    seq: u64,
    /// Attempts started so far.
    attempts: u32,
    last_worker: Option<WorkerId>,
    cancel_requested: bool,
    reply: Option<oneshot::Sender<TaskOutcome>>,
}

/// The single attempt currently running for a task.
struct InFlight {
    worker: WorkerHandle,
    operation: Operation,
    attempt: u32,
    started_at: Instant,
    deadline_timer: Option<AbortHandle>,
}

#[derive(Default)]
struct DispatchState {
    pending: VecDeque<TaskId>,
    tasks: HashMap<TaskId, TaskEntry>,
    in_flight: HashMap<TaskId, InFlight>,
    next_seq: u64,
}

impl DispatchState {
    /// Queue a task, keeping the queue ordered by submission.
    fn enqueue(&mut self, task_id: TaskId) {
        let seq = self.tasks.get(&task_id).map_or(u64::MAX, |e| e.seq);
        let pos = self
            .pending
            .iter()
            .position(|id| self.tasks.get(id).is_some_and(|e| e.seq > seq))
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, task_id);
    }

    /// Remove the in-flight record only if it belongs to `attempt`.
    fn take_in_flight(&mut self, task_id: &TaskId, attempt: u32) -> Option<InFlight> {
        if self.in_flight.get(task_id)?.attempt != attempt {
            return None;
        }
        self.in_flight.remove(task_id)
    }
}

struct Shared {
    state: Mutex<DispatchState>,
    pool: Arc<WorkerPool>,
    transport: Arc<dyn WorkerTransport>,
    sinks: Vec<Arc<dyn ResultSink>>,
    max_retries: u32,
    task_timeout: Duration,
    max_queue_depth: usize,
    shutdown: CancellationToken,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Dispatches tasks onto the worker pool with retries and deadlines.
///
/// Cheap to clone; all clones drive the same state.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create a dispatcher and start watching the pool for idle workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        pool: Arc<WorkerPool>,
        transport: Arc<dyn WorkerTransport>,
        sinks: Vec<Arc<dyn ResultSink>>,
        config: &Config,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(DispatchState::default()),
            pool,
            transport,
            sinks,
            max_retries: config.max_retries.max(1),
            task_timeout: config.task_timeout,
            max_queue_depth: config.max_queue_depth,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(watch_idle_workers(
            Arc::downgrade(&shared),
            shared.shutdown.clone(),
        ));

        Self { shared }
    }

    /// Queue a task and return a future for its outcome.
    pub async fn submit(&self, task: Task) -> Result<TaskTicket, DispatchError> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(DispatchError::ShutDown);
        }
        let mut state = shared.state.lock().await;

        if state.tasks.contains_key(&task.id) {
            return Err(DispatchError::DuplicateTask(task.id));
        }
        if state.pending.len() >= shared.max_queue_depth && shared.pool.idle_count().await == 0 {
            warn!(
                task_id = %task.id,
                pending = state.pending.len(),
                "Rejecting task - pool exhausted"
            );
            return Err(DispatchError::PoolExhausted {
                pending: state.pending.len(),
            });
        }

        let (tx, rx) = oneshot::channel();
        let task_id = task.id.clone();
        let seq = state.next_seq;
        state.next_seq += 1;

        debug!(task_id = %task_id, operation = %task.operation, "Task submitted");
        state.tasks.insert(
            task_id.clone(),
            TaskEntry {
                task: Arc::new(task),
                state: TaskState::Pending,
                seq,
                attempts: 0,
                last_worker: None,
                cancel_requested: false,
                reply: Some(tx),
            },
        );
        state.pending.push_back(task_id.clone());

        shared.pump(&mut state).await;
        Ok(TaskTicket { task_id, rx })
    }

    /// Submit a batch, in order.
    pub async fn submit_all(
        &self,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<Vec<TaskTicket>, DispatchError> {
        let mut tickets = Vec::new();
        for task in tasks {
            tickets.push(self.submit(task).await?);
        }
        Ok(tickets)
    }

    /// Cancel a task.
    ///
    /// A pending task is dropped immediately. For a running task the worker
    /// gets a best-effort cancel signal; the worker is only freed once its
    /// result or the deadline arrives, and the outcome is then `Cancelled`.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<(), DispatchError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;

        if let Some(pos) = state.pending.iter().position(|id| id == task_id) {
            state.pending.remove(pos);
            if let Some(mut entry) = state.tasks.remove(task_id) {
                info!(task_id = %task_id, "Pending task cancelled");
                entry.resolve(TaskOutcome::Cancelled {
                    task_id: task_id.clone(),
                });
            }
            return Ok(());
        }

        let worker = match state.in_flight.get(task_id) {
            Some(flight) => flight.worker.clone(),
            None => return Err(DispatchError::UnknownTask(task_id.clone())),
        };
        if let Some(entry) = state.tasks.get_mut(task_id) {
            entry.cancel_requested = true;
        }
        drop(state);

        info!(task_id = %task_id, worker_id = %worker.worker_id, "Cancelling running task");
        let transport = shared.transport.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.cancel(&worker, &task_id).await {
                warn!(task_id = %task_id, error = %e, "Cancel signal not delivered");
            }
        });
        Ok(())
    }

    /// Hand a result to the dispatcher.
    ///
    /// Results that do not match the current in-flight attempt (late
    /// responses after a timeout, duplicates) are discarded.
    pub async fn deliver(&self, result: TaskResult) {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;

        let Some(mut flight) = state.take_in_flight(&result.task_id, result.attempt) else {
            debug!(
                task_id = %result.task_id,
                attempt = result.attempt,
                worker_id = %result.worker_id,
                "Discarding stale result"
            );
            return;
        };
        if let Some(timer) = flight.deadline_timer.take() {
            timer.abort();
        }

        shared.settle(&mut state, flight, result).await;
        shared.pump(&mut state).await;
    }

    /// Number of tasks waiting for a worker.
    pub async fn pending_len(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    /// Number of attempts currently running.
    pub async fn in_flight_len(&self) -> usize {
        self.shared.state.lock().await.in_flight.len()
    }

    /// Worker running the task's current attempt, if any.
    pub async fn in_flight_worker(&self, task_id: &TaskId) -> Option<WorkerId> {
        self.shared
            .state
            .lock()
            .await
            .in_flight
            .get(task_id)
            .map(|f| f.worker.worker_id.clone())
    }

    /// State of a live task; `None` once it reached a terminal state.
    pub async fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.shared
            .state
            .lock()
            .await
            .tasks
            .get(task_id)
            .map(|e| e.state)
    }

    /// Stop accepting tasks and reacting to pool events. Running attempts
    /// still settle.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }

    /// The worker refused the attempt because it is still running an older
    /// one. The task goes back to the queue without being charged an
    /// attempt, and the worker stays out of rotation until a probe finds it
    /// idle.
    async fn requeue_refused(&self, task_id: &TaskId, attempt: u32, reason: &str) {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;

        let Some(mut flight) = state.take_in_flight(task_id, attempt) else {
            return;
        };
        if let Some(timer) = flight.deadline_timer.take() {
            timer.abort();
        }

        warn!(
            task_id = %task_id,
            worker_id = %flight.worker.worker_id,
            attempt,
            reason,
            "Worker still busy - requeueing task"
        );
        shared.pool.mark_unreachable(&flight.worker.worker_id).await;

        if let Some(entry) = state.tasks.get_mut(task_id) {
            if entry.cancel_requested {
                entry.resolve(TaskOutcome::Cancelled {
                    task_id: task_id.clone(),
                });
                state.tasks.remove(task_id);
            } else {
                entry.attempts = entry.attempts.saturating_sub(1);
                entry.state = TaskState::Pending;
                state.enqueue(task_id.clone());
            }
        }

        shared.pump(&mut state).await;
    }

    async fn on_deadline(&self, task_id: TaskId, attempt: u32) {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;

        let Some(mut flight) = state.take_in_flight(&task_id, attempt) else {
            return;
        };
        // This runs inside the timer task itself; do not abort it.
        flight.deadline_timer = None;

        let elapsed = flight.started_at.elapsed().as_secs_f64();
        warn!(
            task_id = %task_id,
            worker_id = %flight.worker.worker_id,
            attempt,
            elapsed_secs = elapsed,
            "Task attempt timed out"
        );

        let result = TaskResult::failure(
            task_id,
            attempt,
            flight.worker.worker_id.clone(),
            flight.operation,
            FailureReason::Timeout,
            elapsed,
        );

        shared.settle(&mut state, flight, result).await;
        shared.pump(&mut state).await;
    }
}

impl TaskEntry {
    fn resolve(&mut self, outcome: TaskOutcome) {
        self.state = match &outcome {
            TaskOutcome::Completed(_) => TaskState::Completed,
            TaskOutcome::Failed { .. } => TaskState::Failed,
            TaskOutcome::Cancelled { .. } => TaskState::Cancelled,
        };
        if let Some(reply) = self.reply.take() {
            // The submitter may have dropped its ticket; that is fine.
            let _ = reply.send(outcome);
        }
    }
}

impl Shared {
    /// Assign pending tasks to idle workers until either runs out.
    async fn pump(self: &Arc<Self>, state: &mut DispatchState) {
        while !state.pending.is_empty() {
            let mut assigned = None;

            for (idx, task_id) in state.pending.iter().enumerate() {
                let avoid = state.tasks.get(task_id).and_then(|e| e.last_worker.as_ref());
                if let Some(worker) = self.pool.acquire_avoiding(avoid).await {
                    assigned = Some((idx, worker));
                    break;
                }
                if self.pool.idle_count().await == 0 {
                    break;
                }
            }

            let Some((idx, worker)) = assigned else {
                break;
            };
            let Some(task_id) = state.pending.remove(idx) else {
                break;
            };
            let Some(entry) = state.tasks.get_mut(&task_id) else {
                self.pool.release(&worker.worker_id).await;
                continue;
            };

            entry.attempts += 1;
            entry.state = TaskState::Running;
            entry.last_worker = Some(worker.worker_id.clone());
            let attempt = entry.attempts;
            let task = entry.task.clone();

            info!(
                task_id = %task_id,
                worker_id = %worker.worker_id,
                attempt,
                operation = %task.operation,
                "Assigning task to worker"
            );

            let deadline_timer = self.spawn_deadline(task_id.clone(), attempt);
            state.in_flight.insert(
                task_id,
                InFlight {
                    worker: worker.clone(),
                    operation: task.operation,
                    attempt,
                    started_at: Instant::now(),
                    deadline_timer: Some(deadline_timer),
                },
            );

            tokio::spawn(run_attempt(self.clone(), task, worker, attempt));
        }
    }

    fn spawn_deadline(self: &Arc<Self>, task_id: TaskId, attempt: u32) -> AbortHandle {
        let weak = Arc::downgrade(self);
        let timeout = self.task_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                Dispatcher { shared }.on_deadline(task_id, attempt).await;
            }
        })
        .abort_handle()
    }

    /// Apply a settled attempt: update the worker, forward the result, and
    /// either resolve the task or queue it again.
    async fn settle(&self, state: &mut DispatchState, flight: InFlight, result: TaskResult) {
        let worker_id = &flight.worker.worker_id;

        match &result.status {
            ResultStatus::Success => {
                self.pool.release(worker_id).await;
            }
            ResultStatus::Failure(reason) if reason.is_worker_fault() => {
                warn!(worker_id = %worker_id, reason = %reason, "Worker lost - deregistering");
                self.pool.deregister(worker_id).await;
            }
            ResultStatus::Failure(_) => {
                self.pool.release(worker_id).await;
            }
        }

        let task_id = result.task_id.clone();
        let Some(entry) = state.tasks.get_mut(&task_id) else {
            return;
        };

        if entry.cancel_requested {
            info!(task_id = %task_id, "Cancelled task settled");
            entry.resolve(TaskOutcome::Cancelled {
                task_id: task_id.clone(),
            });
            state.tasks.remove(&task_id);
            return;
        }

        for sink in &self.sinks {
            sink.record(&result);
        }

        match result.status.clone() {
            ResultStatus::Success => {
                info!(
                    task_id = %task_id,
                    worker_id = %worker_id,
                    attempt = result.attempt,
                    duration_secs = result.duration,
                    "Task completed"
                );
                entry.resolve(TaskOutcome::Completed(Arc::new(result)));
                state.tasks.remove(&task_id);
            }
            ResultStatus::Failure(reason) => {
                if reason.is_retryable() && entry.attempts < self.max_retries {
                    warn!(
                        task_id = %task_id,
                        worker_id = %worker_id,
                        attempt = result.attempt,
                        reason = %reason,
                        "Task attempt failed - requeueing"
                    );
                    entry.state = TaskState::Pending;
                    state.enqueue(task_id);
                } else {
                    warn!(
                        task_id = %task_id,
                        attempts = entry.attempts,
                        reason = %reason,
                        "Task failed permanently"
                    );
                    for sink in &self.sinks {
                        sink.task_abandoned(&entry.task, &reason);
                    }
                    let attempts = entry.attempts;
                    entry.resolve(TaskOutcome::Failed {
                        task_id: task_id.clone(),
                        attempts,
                        reason,
                    });
                    state.tasks.remove(&task_id);
                }
            }
        }
    }
}

/// Run one attempt against a worker and hand the outcome back.
///
/// Boxed because delivering the result schedules further attempts.
fn run_attempt(
    shared: Arc<Shared>,
    task: Arc<Task>,
    worker: WorkerHandle,
    attempt: u32,
) -> BoxFuture<'static, ()> {
    async move {
        let started = Instant::now();
        let request = ExecuteRequest::for_attempt(&task, attempt);

        let outcome = shared
            .transport
            .execute(&worker, request)
            .await
            .and_then(|resp| {
                if resp.task_id != task.id.as_str() || resp.attempt != attempt {
                    Err(TransportError::InvalidResponse(format!(
                        "response for {}#{} while running {}#{}",
                        resp.task_id, resp.attempt, task.id, attempt
                    )))
                } else {
                    Ok(resp)
                }
            });

        let dispatcher = Dispatcher { shared };
        let result = match outcome {
            Ok(resp) => resp.into_result(worker.worker_id.clone(), task.operation),
            Err(TransportError::Busy(msg)) => {
                dispatcher.requeue_refused(&task.id, attempt, &msg).await;
                return;
            }
            Err(e) => TaskResult::failure(
                task.id.clone(),
                attempt,
                worker.worker_id.clone(),
                task.operation,
                e.into_failure(),
                started.elapsed().as_secs_f64(),
            ),
        };

        dispatcher.deliver(result).await;
    }
    .boxed()
}

/// Run a scheduling cycle whenever the pool reports an idle worker.
async fn watch_idle_workers(shared: Weak<Shared>, shutdown: CancellationToken) {
    loop {
        let pool = match shared.upgrade() {
            Some(s) => s.pool.clone(),
            None => return,
        };

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = pool.idle_notify().notified() => {}
        }

        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock().await;
        shared.pump(&mut state).await;
    }
}
