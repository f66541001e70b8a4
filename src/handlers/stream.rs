//! Media-stream WebSocket endpoint
//!
//! Each accepted connection becomes one [`CallSession`]. Text frames are fed
//! to the session in arrival order; the stream ends on a close frame or a
//! transport error.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::{StreamExt, future};
use tracing::{info, warn};

use crate::core::control::is_valid_call_id;
use crate::errors::app_error::AppError;
use crate::session::CallSession;
use crate::state::{AppState, CallSlot};

/// Media frames are small; anything near this is not telephony audio.
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// `GET /stream` - call id arrives with the `start` event.
pub async fn stream_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    upgrade(ws, state, None)
}

/// `GET /stream/{call_id}` - call id known from the answer webhook.
pub async fn stream_handler_for_call(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Response {
    if !is_valid_call_id(&call_id) {
        return AppError::BadRequest(format!("Invalid call id: {call_id}")).into_response();
    }
    upgrade(ws, state, Some(call_id))
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<AppState>, call_id: Option<String>) -> Response {
    let slot = match state.try_acquire_call() {
        Ok(slot) => slot,
        Err(reached) => {
            warn!(
                call_id = ?call_id,
                limit = reached.limit,
                "Rejecting media stream: call capacity reached"
            );
            return AppError::ServiceUnavailable("Server at call capacity".to_string())
                .into_response();
        }
    };

    info!(call_id = ?call_id, "Media stream upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_stream_socket(socket, state, call_id, slot))
}

async fn handle_stream_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    call_id: Option<String>,
    _slot: CallSlot,
) {
    let session = CallSession::new(state.session_context(), call_id);
    let connection_id = session.connection_id().to_string();
    info!(connection_id = %connection_id, "Media stream connected");

    let inbound = socket
        .take_while(|msg| {
            let keep = match msg {
                Ok(Message::Close(_)) => false,
                Ok(_) => true,
                Err(e) => {
                    warn!("Media stream transport error: {}", e);
                    false
                }
            };
            future::ready(keep)
        })
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text.to_string()),
                _ => None,
            })
        })
        .boxed();

    let summary = session.run(inbound).await;

    info!(
        connection_id = %summary.connection_id,
        call_id = ?summary.call_id,
        state = %summary.final_state,
        turns_started = summary.turns_started,
        turns_completed = summary.turns_completed,
        turns_failed = summary.turns_failed,
        frames_forwarded = summary.frames_forwarded,
        frames_dropped = summary.frames_dropped,
        frames_malformed = summary.frames_malformed,
        error = ?summary.error,
        "Media stream closed"
    );
}
