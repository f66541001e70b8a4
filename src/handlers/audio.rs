use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::storage::is_valid_key;
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Synthesized replies never change under a given key.
const CACHE_CONTROL: &str = "public, max-age=86400, immutable";

/// Serve synthesized reply audio by key
///
/// The telephony platform fetches these URLs from `<Play>` verbs. Keys are
/// content hashes, so responses are cacheable.
pub async fn get_audio(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> AppResult<Response> {
    if !is_valid_key(&key) {
        return Err(AppError::BadRequest(format!("Invalid audio key: {key}")));
    }

    debug!("Audio requested - key={}", key);

    let audio = state.audio_store.get(&key).await?;
    let size = audio.data.len();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(audio.content_type),
    );
    if let Ok(len) = HeaderValue::from_str(&size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, len);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));

    info!("Audio served - key={}, size={} bytes", key, size);

    Ok((StatusCode::OK, headers, audio.data).into_response())
}
