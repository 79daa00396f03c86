//! Controller-to-worker transport.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use quakerun_core::{FailureReason, TaskId, WorkerHandle};
use quakerun_proto::{paths, ErrorResponse, ExecuteRequest, ExecuteResponse, HealthResponse};

/// Errors raised while talking to a worker.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The worker could not be reached at all.
    #[error("worker unreachable: {0}")]
    Unreachable(String),

    /// The worker is still running another task.
    #[error("worker busy: {0}")]
    Busy(String),

    /// The worker answered with an error status.
    #[error("worker rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The worker answered with something that is not a valid response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Classify as a per-attempt failure.
    ///
    /// Only a connection-level failure counts as a worker fault; a worker
    /// that answers, even with garbage, is alive.
    pub fn into_failure(self) -> FailureReason {
        match self {
            TransportError::Unreachable(msg) => FailureReason::WorkerUnreachable(msg),
            other => FailureReason::Execution(other.to_string()),
        }
    }
}

/// The request/response contract the dispatcher needs from a worker.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Run one task attempt and wait for its outcome.
    async fn execute(
        &self,
        worker: &WorkerHandle,
        request: ExecuteRequest,
    ) -> Result<ExecuteResponse, TransportError>;

    /// Liveness probe; returns the worker's own view of its activity.
    async fn probe(&self, worker: &WorkerHandle) -> Result<HealthResponse, TransportError>;

    /// Best-effort cancellation of a running task.
    async fn cancel(&self, worker: &WorkerHandle, task_id: &TaskId) -> Result<(), TransportError>;
}

/// JSON-over-HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport whose calls give up after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            probe_timeout: Duration::from_secs(2),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        if status == reqwest::StatusCode::CONFLICT {
            return Err(TransportError::Busy(message));
        }
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn send_error(e: reqwest::Error) -> TransportError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        TransportError::Unreachable(e.to_string())
    } else {
        TransportError::InvalidResponse(e.to_string())
    }
}

#[async_trait]
impl WorkerTransport for HttpTransport {
    async fn execute(
        &self,
        worker: &WorkerHandle,
        request: ExecuteRequest,
    ) -> Result<ExecuteResponse, TransportError> {
        let url = worker.endpoint(paths::EXECUTE);
        debug!(url = %url, task_id = %request.task_id, attempt = request.attempt, "POST execute");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(send_error)?;

        Self::check(response)
            .await?
            .json::<ExecuteResponse>()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    async fn probe(&self, worker: &WorkerHandle) -> Result<HealthResponse, TransportError> {
        let response = self
            .client
            .get(worker.endpoint(paths::HEALTH))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(send_error)?;

        Self::check(response)
            .await?
            .json::<HealthResponse>()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    async fn cancel(&self, worker: &WorkerHandle, task_id: &TaskId) -> Result<(), TransportError> {
        let response = self
            .client
            .post(worker.endpoint(&paths::cancel(task_id.as_str())))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(send_error)?;

        Self::check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unreachable_is_a_worker_fault() {
        let unreachable = TransportError::Unreachable("connection refused".into()).into_failure();
        assert!(unreachable.is_worker_fault());

        let rejected = TransportError::Rejected {
            status: 500,
            message: "disk full".into(),
        }
        .into_failure();
        assert!(!rejected.is_worker_fault());
        assert!(rejected.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_conflict_is_busy_and_health_is_decoded() {
        use axum::{http::StatusCode, routing::{get, post}, Json, Router};
        use quakerun_core::{Operation, Payload, Task};

        let router = Router::new()
            .route(
                paths::EXECUTE,
                post(|| async {
                    (StatusCode::CONFLICT, Json(ErrorResponse::new("Worker busy running t0")))
                }),
            )
            .route(
                paths::HEALTH,
                get(|| async { Json(HealthResponse::busy("w1", "t0")) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });

        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let worker = WorkerHandle::new("w1", format!("http://{addr}"));

        let task = Task::new(Operation::Preclassical, 0, Payload::empty()).with_id("t1");
        let err = transport
            .execute(&worker, ExecuteRequest::for_attempt(&task, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Busy(ref msg) if msg.contains("t0")));

        let health = transport.probe(&worker).await.unwrap();
        assert!(!health.is_idle());
        assert_eq!(health.running_task.as_deref(), Some("t0"));
    }

    #[tokio::test]
    async fn test_probe_of_closed_port_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let worker = WorkerHandle::new("w1", format!("http://{addr}"));

        let err = transport.probe(&worker).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }
}
