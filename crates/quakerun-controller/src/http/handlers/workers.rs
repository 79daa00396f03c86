//! Worker registry handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use quakerun_core::{WorkerHandle, WorkerId};
use quakerun_proto::{ErrorResponse, RegisterWorkerRequest, WorkerListResponse, WorkerSummary};

use crate::state::AppState;

/// Register a worker, or refresh its registration.
///
/// Returns 201 for a new worker and 200 for a refresh.
pub async fn register_worker(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterWorkerRequest>,
) -> Result<(StatusCode, Json<WorkerSummary>), (StatusCode, Json<ErrorResponse>)> {
    if req.worker_id.trim().is_empty() || req.address.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("worker_id and address are required")),
        ));
    }

    let handle = WorkerHandle::from(req);
    let worker_id = handle.worker_id.clone();
    let is_new = state.pool.register(handle).await;

    let current = state.pool.get(&worker_id).await.ok_or_else(|| {
        (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("worker removed during registration")),
        )
    })?;

    let status = if is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(WorkerSummary::from(&current))))
}

/// List registered workers.
pub async fn list_workers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let workers = state
        .pool
        .list()
        .await
        .iter()
        .map(WorkerSummary::from)
        .collect();
    Json(WorkerListResponse { workers })
}

/// Remove a worker from the pool.
pub async fn deregister_worker(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
) -> impl IntoResponse {
    match state.pool.deregister(&WorkerId::new(worker_id.clone())).await {
        Some(_) => {
            info!(worker_id = %worker_id, "Worker deregistered via API");
            StatusCode::NO_CONTENT.into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("Unknown worker: {worker_id}"))),
        )
            .into_response(),
    }
}
