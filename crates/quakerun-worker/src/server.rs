//! HTTP endpoints the controller calls on this worker.
//!
//! A worker runs one task at a time; a second execute request while one is
//! running is refused with 409 so the controller can tell a busy worker
//! from a dead one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use quakerun_core::{Payload, WorkerId};
use quakerun_proto::{
    paths, CancelResponse, ErrorResponse, ExecuteRequest, ExecuteResponse, HealthResponse,
    WireStatus,
};

use crate::executor::Executor;
use crate::memory::PeakMemorySampler;

const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

struct RunningTask {
    task_id: String,
    cancel: CancellationToken,
}

/// State shared by the worker's handlers.
pub struct WorkerState {
    worker_id: WorkerId,
    executor: Arc<dyn Executor>,
    running: Mutex<Option<RunningTask>>,
}

impl WorkerState {
    pub fn new(worker_id: WorkerId, executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            worker_id,
            executor,
            running: Mutex::new(None),
        })
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningTask>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id of the task currently running, if any.
    pub fn running_task(&self) -> Option<String> {
        self.running().as_ref().map(|r| r.task_id.clone())
    }
}

/// Frees the execution slot even if the request future is dropped.
struct SlotGuard<'a>(&'a WorkerState);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.running().take();
    }
}

/// Create the worker's HTTP router.
pub fn create_router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route(paths::EXECUTE, post(execute))
        .route(paths::HEALTH, get(health))
        .route(paths::CANCEL, post(cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Run one task attempt and report its outcome with resource accounting.
async fn execute(State(state): State<Arc<WorkerState>>, body: Bytes) -> Response {
    let bytes_received = body.len() as u64;
    let request: ExecuteRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("Invalid request: {e}")),
    };

    let cancel = CancellationToken::new();
    {
        let mut running = state.running();
        if let Some(current) = running.as_ref() {
            warn!(
                task_id = %request.task_id,
                running = %current.task_id,
                "Refusing task - worker busy"
            );
            return error(
                StatusCode::CONFLICT,
                format!("Worker busy running {}", current.task_id),
            );
        }
        *running = Some(RunningTask {
            task_id: request.task_id.clone(),
            cancel: cancel.clone(),
        });
    }
    let _slot = SlotGuard(&state);

    info!(
        task_id = %request.task_id,
        attempt = request.attempt,
        operation = %request.operation,
        bytes_received,
        "Executing task"
    );

    let sampler = PeakMemorySampler::start(MEMORY_SAMPLE_INTERVAL);
    let started = Instant::now();
    let outcome = state.executor.execute(&request, &cancel).await;
    let duration = started.elapsed().as_secs_f64();
    let peak_memory_mb = sampler.finish().await;

    let (status, error, payload) = match outcome {
        Ok(payload) => (WireStatus::Success, None, payload),
        Err(e) => {
            warn!(task_id = %request.task_id, error = %e, "Task failed");
            (WireStatus::Failure, Some(e.to_string()), Payload::empty())
        }
    };

    info!(
        task_id = %request.task_id,
        attempt = request.attempt,
        duration_secs = duration,
        peak_memory_mb,
        "Task finished"
    );

    Json(ExecuteResponse {
        task_id: request.task_id,
        attempt: request.attempt,
        status,
        error,
        duration,
        peak_memory_mb,
        bytes_sent: payload.len() as u64,
        bytes_received,
        payload,
    })
    .into_response()
}

/// Liveness probe.
async fn health(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    let worker_id = state.worker_id.as_str();
    Json(match state.running_task() {
        Some(task_id) => HealthResponse::busy(worker_id, task_id),
        None => HealthResponse::idle(worker_id),
    })
}

/// Best-effort cancellation of the running task.
async fn cancel(
    State(state): State<Arc<WorkerState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = match state.running().as_ref() {
        Some(current) if current.task_id == task_id => {
            current.cancel.cancel();
            true
        }
        _ => false,
    };

    if cancelled {
        info!(task_id = %task_id, "Cancel requested");
    }
    Json(CancelResponse { task_id, cancelled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use quakerun_core::{Operation, SourceSpec, TaskOutput};

    use crate::executor::{ExecutorError, SimulatedExecutor};

    /// Blocks until released or cancelled.
    struct Blocking {
        release: Notify,
    }

    #[async_trait]
    impl Executor for Blocking {
        async fn execute(
            &self,
            _request: &ExecuteRequest,
            cancel: &CancellationToken,
        ) -> Result<Payload, ExecutorError> {
            tokio::select! {
                _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
                _ = self.release.notified() => Ok(Payload::new(b"ok".to_vec())),
            }
        }
    }

    fn execute_request(task_id: &str) -> Request<Body> {
        let req = ExecuteRequest {
            task_id: task_id.to_string(),
            attempt: 1,
            operation: Operation::Preclassical,
            group_id: 0,
            seed: 1,
            payload: Payload::from_json(&vec![SourceSpec::new("a", 'P', 10)]).unwrap(),
        };
        Request::builder()
            .method("POST")
            .uri(paths::EXECUTE)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&req).unwrap()))
            .unwrap()
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn wait_running(state: &WorkerState) {
        for _ in 0..200 {
            if state.running_task().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task never started");
    }

    #[tokio::test]
    async fn test_execute_reports_accounting() {
        let state = WorkerState::new(WorkerId::new("w1"), Arc::new(SimulatedExecutor::new(0.01)));
        let router = create_router(state.clone());

        let request = execute_request("t1");
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let resp: ExecuteResponse = decode(response).await;
        assert_eq!(resp.task_id, "t1");
        assert_eq!(resp.status, WireStatus::Success);
        assert!(resp.duration > 0.0);
        assert!(resp.bytes_received > 0);
        assert_eq!(resp.bytes_sent, resp.payload.len() as u64);

        let output: TaskOutput = resp.payload.decode_json().unwrap();
        assert_eq!(output.source_timings.len(), 1);
        assert!(state.running_task().is_none());
    }

    #[tokio::test]
    async fn test_bad_request_body() {
        let state = WorkerState::new(WorkerId::new("w1"), Arc::new(SimulatedExecutor::new(0.0)));
        let request = Request::builder()
            .method("POST")
            .uri(paths::EXECUTE)
            .body(Body::from("not json"))
            .unwrap();

        let response = create_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_second_task_rejected_while_busy_then_cancel() {
        let executor = Arc::new(Blocking {
            release: Notify::new(),
        });
        let state = WorkerState::new(WorkerId::new("w1"), executor);
        let router = create_router(state.clone());

        let first = tokio::spawn(router.clone().oneshot(execute_request("t1")));
        wait_running(&state).await;

        let response = router.clone().oneshot(execute_request("t2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let health: HealthResponse = decode(
            router
                .clone()
                .oneshot(Request::get(paths::HEALTH).body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(health.status, "busy");
        assert_eq!(health.running_task.as_deref(), Some("t1"));

        let cancel = Request::builder()
            .method("POST")
            .uri(paths::cancel("t1"))
            .body(Body::empty())
            .unwrap();
        let resp: CancelResponse = decode(router.clone().oneshot(cancel).await.unwrap()).await;
        assert!(resp.cancelled);

        let resp: ExecuteResponse = decode(first.await.unwrap().unwrap()).await;
        assert_eq!(resp.status, WireStatus::Failure);
        assert_eq!(resp.error.as_deref(), Some("Task cancelled"));
        assert!(state.running_task().is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let state = WorkerState::new(WorkerId::new("w1"), Arc::new(SimulatedExecutor::new(0.0)));
        let cancel = Request::builder()
            .method("POST")
            .uri(paths::cancel("nope"))
            .body(Body::empty())
            .unwrap();

        let resp: CancelResponse = decode(create_router(state).oneshot(cancel).await.unwrap()).await;
        assert!(!resp.cancelled);
    }
}
