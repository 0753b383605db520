use crate::server::AdminState;
use axum::{extract::State, http::StatusCode, response::Json};
use portal_core::{AggregateStats, RequestRecord};
use std::sync::Arc;
use tracing::info;

/// Buffered records, oldest first.
pub async fn list_requests(State(state): State<Arc<AdminState>>) -> Json<Vec<RequestRecord>> {
    Json(state.provider.snapshot())
}

pub async fn clear_requests(State(state): State<Arc<AdminState>>) -> StatusCode {
    state.provider.reset();
    info!(component = "admin", "Request log cleared");
    StatusCode::NO_CONTENT
}

pub async fn stats(State(state): State<Arc<AdminState>>) -> Json<AggregateStats> {
    Json(state.provider.aggregate_stats())
}
