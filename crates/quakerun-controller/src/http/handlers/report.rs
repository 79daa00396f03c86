//! Composite report handler.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::state::AppState;

/// Current composite report.
///
/// Partial until every expected task is in and nothing is left queued or
/// running on the dispatcher.
pub async fn get_report(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut report = state.assembler.finalize();
    let outstanding = state.dispatcher.pending_len().await + state.dispatcher.in_flight_len().await;
    if outstanding > 0 {
        report.complete = false;
    }
    Json(report)
}
