//! Media-stream WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{stream_handler, stream_handler_for_call};
use crate::state::AppState;
use std::sync::Arc;

/// Create the media-stream router
///
/// # Endpoints
///
/// - `GET /stream` - WebSocket upgrade; the call id comes from the `start` event
/// - `GET /stream/{call_id}` - WebSocket upgrade for a known call
///
/// # Protocol
///
/// The platform sends JSON text frames:
///
/// ```json
/// {"event": "start", "start": {"streamSid": "MZ...", "callSid": "CA...", "mediaFormat": {...}}}
/// {"event": "media", "media": {"track": "inbound", "payload": "<base64 mu-law>"}}
/// {"event": "stop", "stop": {"callSid": "CA..."}}
/// ```
///
/// Replies are not sent on this socket; they reach the call through the
/// call-control plane.
pub fn create_stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stream", get(stream_handler))
        .route("/stream/{call_id}", get(stream_handler_for_call))
        .layer(TraceLayer::new_for_http())
}
