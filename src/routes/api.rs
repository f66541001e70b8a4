use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, audio};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router
///
/// `/audio/{key}` is fetched by the telephony platform from `<Play>` verbs.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/calls/stats", get(api::call_stats))
        .route("/audio/{key}", get(audio::get_audio))
        .layer(TraceLayer::new_for_http())
}
