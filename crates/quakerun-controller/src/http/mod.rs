//! HTTP server for the controller.
//!
//! Provides endpoints for:
//! - Worker registration and listing (`/v1/workers`)
//! - The composite report (`/v1/report`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::trace::TraceLayer;

use quakerun_proto::paths;

use crate::state::AppState;

mod handlers;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Worker registry
        .route(
            paths::WORKERS,
            get(handlers::list_workers).post(handlers::register_worker),
        )
        .route("/v1/workers/:worker_id", delete(handlers::deregister_worker))
        // Results
        .route("/v1/report", get(handlers::get_report))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use quakerun_core::{
        Operation, Payload, ResultStatus, Task, TaskId, TaskResult, WorkerHandle, WorkerId,
    };
    use quakerun_proto::{ExecuteRequest, ExecuteResponse, HealthResponse};

    use crate::config::Config;
    use crate::transport::{TransportError, WorkerTransport};

    struct NoWorkers;

    #[async_trait]
    impl WorkerTransport for NoWorkers {
        async fn execute(
            &self,
            _worker: &WorkerHandle,
            _request: ExecuteRequest,
        ) -> Result<ExecuteResponse, TransportError> {
            Err(TransportError::Unreachable("offline".into()))
        }

        async fn probe(&self, worker: &WorkerHandle) -> Result<HealthResponse, TransportError> {
            Ok(HealthResponse::idle(worker.worker_id.as_str()))
        }

        async fn cancel(
            &self,
            _worker: &WorkerHandle,
            _task_id: &TaskId,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn app() -> (Arc<AppState>, Router) {
        let state = AppState::with_transport(Config::default(), Arc::new(NoWorkers));
        (state.clone(), create_router(state))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn register(id: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/workers")
            .header("content-type", "application/json")
            .body(Body::from(format!(
                r#"{{"worker_id":"{id}","address":"http://{id}:1909"}}"#
            )))
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_then_list() {
        let (state, router) = app();

        let response = router.clone().oneshot(register("w1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // A refresh is not a new registration.
        let response = router.clone().oneshot(register("w1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.pool.len().await, 1);

        let response = router
            .oneshot(Request::get("/v1/workers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["workers"][0]["worker_id"], "w1");
        assert_eq!(json["workers"][0]["status"], "IDLE");
    }

    #[tokio::test]
    async fn test_register_rejects_blank_fields() {
        let (_state, router) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/workers")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"worker_id":"","address":""}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_deregister() {
        let (state, router) = app();
        router.clone().oneshot(register("w1")).await.unwrap();

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri("/v1/workers/w1")
                .body(Body::empty())
                .unwrap()
        };
        let response = router.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.pool.is_empty().await);

        let response = router.oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_report_and_metrics() {
        let (_state, router) = app();

        let response = router
            .clone()
            .oneshot(Request::get("/v1/report").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["complete"], false);
        assert_eq!(json["completed_tasks"], 0);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("quakerun_workers{status=\"idle\"} 0"));
        assert!(text.contains("quakerun_tasks{state=\"pending\"} 0"));
    }

    #[tokio::test]
    async fn test_report_incomplete_while_tasks_outstanding() {
        let (state, router) = app();
        let get_report = || Request::get("/v1/report").body(Body::empty()).unwrap();

        state.assembler.absorb(&TaskResult {
            task_id: TaskId::new("t1"),
            attempt: 1,
            worker_id: WorkerId::new("w1"),
            operation: Operation::Preclassical,
            status: ResultStatus::Success,
            duration: 0.1,
            peak_memory_mb: 8.0,
            bytes_sent: 10,
            bytes_received: 20,
            payload: Payload::empty(),
        });
        let json = json_body(router.clone().oneshot(get_report()).await.unwrap()).await;
        assert_eq!(json["complete"], true);

        // No workers are registered, so this one stays queued.
        state
            .dispatcher
            .submit(Task::new(Operation::Preclassical, 0, Payload::empty()).with_id("t2"))
            .await
            .unwrap();
        let json = json_body(router.oneshot(get_report()).await.unwrap()).await;
        assert_eq!(json["complete"], false);
    }

    #[tokio::test]
    async fn test_health() {
        let (_state, router) = app();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["status"], "ok");
    }
}
