use axum::{Router, routing::get};
use std::sync::Arc;

use crate::handlers::api::health_check;
use crate::state::AppState;

pub mod api;
pub mod stream;
pub mod webhooks;

/// All routes with state applied, without the outer security layers added in `main`.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .merge(webhooks::create_webhook_router())
        .merge(api::create_api_router())
        .merge(stream::create_stream_router())
        .with_state(state)
}
