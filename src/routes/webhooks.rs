//! Telephony webhook routes
//!
//! The platform calls these with form-encoded bodies and expects TwiML back.

use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::voice;
use crate::state::AppState;
use std::sync::Arc;

/// Create the webhook router
///
/// # Endpoints
///
/// - `POST /voice` - answer an inbound call
/// - `POST /voice/gather` - speech recognized by the platform
/// - `POST /voice/reply/{call_id}` - pending reply for a redirected call
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/voice", post(voice::answer_call))
        .route("/voice/gather", post(voice::gather_speech))
        .route("/voice/reply/{call_id}", post(voice::serve_reply))
        .layer(TraceLayer::new_for_http())
}
