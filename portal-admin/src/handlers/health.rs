use crate::server::AdminState;
use axum::{extract::State, http::StatusCode, response::Json};
use portal_exposure::ReadySummary;
use serde_json::{Value, json};
use std::sync::Arc;

pub async fn health_check(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let ready = state.endpoint.load().is_some();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend_mode": state.mode.as_str(),
        "backend_url": state.mode.backend_url(),
        "log_provider": true,
        "ready": ready,
        "metrics": state.metrics.as_ref().is_some_and(|m| m.is_enabled()),
    }))
}

/// Startup summary; 503 until the exposure is ready.
pub async fn endpoint(State(state): State<Arc<AdminState>>) -> Result<Json<ReadySummary>, StatusCode> {
    match state.endpoint.load_full() {
        Some(summary) => Ok(Json(ReadySummary::clone(&summary))),
        None => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
