use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

/// Health check
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "OK" }))
}

/// Current call counts, for operators.
pub async fn call_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "active_streams": state.active_calls(),
        "registered_calls": state.registry.len(),
        "pending_replies": state.directive_board.len(),
        "max_concurrent_calls": state.config.max_concurrent_calls,
    }))
}
