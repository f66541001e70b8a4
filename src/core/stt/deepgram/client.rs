//! Deepgram live-streaming transcription link.
//!
//! ```text
//! send_audio() ──▶ ws_sender (mpsc, 64) ──▶ connection task ──▶ Deepgram
//!                                               │
//!                    result_tx (mpsc) ◀─────────┘
//!                          │
//!                  forward task ──▶ transcript callback
//! ```
//!
//! The connection task owns the socket. Transcript events flow through a
//! single channel and a single forwarding task, so the callback sees them in
//! the order Deepgram produced them. Audio is handed over with `try_send`;
//! when the channel is full the chunk is dropped rather than stalling the
//! caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep_until, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::config::DeepgramLinkConfig;
use super::messages::{ControlMessage, DeepgramMessage};
use crate::core::stt::base::{
    LinkErrorCallback, LinkFactory, LinkHandshake, STTConfig, STTError, TranscriptCallback,
    TranscriptEvent, TranscriptionLink,
};

// =============================================================================
// Constants
// =============================================================================

/// Upper bound on a single forwarded chunk. Media frames are ~160 bytes.
pub const MAX_AUDIO_CHUNK_SIZE: usize = 256 * 1024;

/// Capacity of the outbound audio channel.
pub const AUDIO_CHANNEL_CAPACITY: usize = 64;

pub const MIN_SAMPLE_RATE: u32 = 8000;
pub const MAX_SAMPLE_RATE: u32 = 48000;

const CLOSE_WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// DeepgramLink
// =============================================================================

pub struct DeepgramLink {
    config: DeepgramLinkConfig,

    /// Bounded audio channel into the connection task.
    ws_sender: Option<mpsc::Sender<Bytes>>,

    shutdown_tx: Option<oneshot::Sender<()>>,

    connection_handle: Option<JoinHandle<()>>,
    result_forward_handle: Option<JoinHandle<()>>,
    error_forward_handle: Option<JoinHandle<()>>,

    transcript_callback: Arc<Mutex<Option<TranscriptCallback>>>,
    error_callback: Arc<Mutex<Option<LinkErrorCallback>>>,

    /// Set by the connection task once the handshake succeeds, cleared on any exit.
    is_connected: Arc<AtomicBool>,

    /// Terminal: once closed, the link never reopens.
    closed: bool,
}

impl DeepgramLink {
    pub fn new(config: DeepgramLinkConfig) -> Result<Self, STTError> {
        if config.base.api_key.is_empty() {
            return Err(STTError::AuthenticationFailed(
                "API key is required for Deepgram".to_string(),
            ));
        }

        let sample_rate = config.base.sample_rate;
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(STTError::ConfigurationError(format!(
                "Sample rate {sample_rate} Hz is outside supported range ({MIN_SAMPLE_RATE}-{MAX_SAMPLE_RATE} Hz)"
            )));
        }

        // Fail fast on a bad URL instead of at call time.
        config.build_websocket_url()?;

        Ok(Self {
            config,
            ws_sender: None,
            shutdown_tx: None,
            connection_handle: None,
            result_forward_handle: None,
            error_forward_handle: None,
            transcript_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            is_connected: Arc::new(AtomicBool::new(false)),
            closed: false,
        })
    }

    pub fn from_stt_config(config: STTConfig) -> Result<Self, STTError> {
        Self::new(DeepgramLinkConfig::from_base(config)?)
    }

    pub fn config(&self) -> &DeepgramLinkConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle one message from Deepgram.
    ///
    /// Returns `Ok(false)` when the remote side ended the stream.
    pub(crate) async fn handle_websocket_message(
        message: Message,
        result_tx: &mpsc::Sender<TranscriptEvent>,
    ) -> Result<bool, STTError> {
        match message {
            Message::Text(text) => match DeepgramMessage::parse(&text) {
                Ok(DeepgramMessage::Results(results)) => {
                    let event = results.to_event();
                    debug!(
                        is_final = event.is_final,
                        end_of_turn = event.end_of_turn,
                        "Deepgram transcript: {}",
                        event.text
                    );
                    if result_tx.send(event).await.is_err() {
                        debug!("Transcript receiver dropped");
                        return Ok(false);
                    }
                }
                Ok(DeepgramMessage::Metadata(meta)) => {
                    info!(request_id = %meta.request_id, "Deepgram stream metadata received");
                }
                Ok(DeepgramMessage::UtteranceEnd(end)) => {
                    debug!(last_word_end = end.last_word_end, "Deepgram utterance end");
                    if result_tx.send(end.to_event()).await.is_err() {
                        debug!("Transcript receiver dropped");
                        return Ok(false);
                    }
                }
                Ok(DeepgramMessage::SpeechStarted(started)) => {
                    debug!(timestamp = started.timestamp, "Deepgram speech started");
                }
                Ok(DeepgramMessage::Unknown(raw)) => {
                    debug!("Ignoring unknown Deepgram message: {}", raw);
                }
                Err(e) => {
                    warn!("Failed to parse Deepgram message: {}", e);
                }
            },
            Message::Close(frame) => {
                info!("Deepgram closed the stream: {:?}", frame);
                return Ok(false);
            }
            Message::Binary(_) => {
                debug!("Received unexpected binary message from Deepgram");
            }
            _ => {}
        }

        Ok(true)
    }

    fn classify_connect_error(err: tokio_tungstenite::tungstenite::Error) -> STTError {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Http(response)
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                STTError::AuthenticationFailed(format!(
                    "Deepgram rejected credentials ({})",
                    response.status()
                ))
            }
            WsError::Http(response) => STTError::ConnectionFailed(format!(
                "Deepgram handshake failed with status {}",
                response.status()
            )),
            other => STTError::ConnectionFailed(format!("Failed to connect to Deepgram: {other}")),
        }
    }
}

impl Drop for DeepgramLink {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        for handle in [
            self.result_forward_handle.take(),
            self.error_forward_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

// =============================================================================
// TranscriptionLink Implementation
// =============================================================================

#[async_trait]
impl TranscriptionLink for DeepgramLink {
    async fn open(&mut self, call_id: &str) -> Result<LinkHandshake, STTError> {
        if self.closed {
            return Err(STTError::Closed("link already closed".to_string()));
        }
        if self.connection_handle.is_some() {
            return Err(STTError::ConfigurationError(
                "link is already open".to_string(),
            ));
        }

        let ws_url = self.config.build_websocket_url()?;
        let mut request = ws_url.as_str().into_client_request().map_err(|e| {
            STTError::ConnectionFailed(format!("Failed to create WebSocket request: {e}"))
        })?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.base.api_key))
            .map_err(|_| {
                STTError::AuthenticationFailed("API key contains invalid characters".to_string())
            })?;
        request.headers_mut().insert(http::header::AUTHORIZATION, auth);

        let (ws_tx, mut ws_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let (result_tx, mut result_rx) = mpsc::channel::<TranscriptEvent>(256);
        let (error_tx, mut error_rx) = mpsc::channel::<STTError>(8);
        let (connected_tx, connected_rx) = oneshot::channel::<Result<(), STTError>>();

        self.ws_sender = Some(ws_tx);
        self.shutdown_tx = Some(shutdown_tx);

        let is_connected = self.is_connected.clone();
        let keepalive_every = self.config.keepalive_interval;
        let idle_timeout = self.config.idle_timeout;
        let call_id = call_id.to_string();

        let connection_handle = tokio::spawn(async move {
            let connected = tokio::select! {
                result = connect_async(request) => result,
                _ = &mut shutdown_rx => {
                    let _ = connected_tx.send(Err(STTError::Closed(
                        "closed during handshake".to_string(),
                    )));
                    return;
                }
            };
            let ws_stream = match connected {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    let stt_error = Self::classify_connect_error(e);
                    error!(call_id = %call_id, "{}", stt_error);
                    let _ = connected_tx.send(Err(stt_error));
                    return;
                }
            };

            is_connected.store(true, Ordering::Release);
            let _ = connected_tx.send(Ok(()));
            info!(call_id = %call_id, "Connected to Deepgram live transcription");

            let (mut ws_sink, mut ws_stream) = ws_stream.split();
            let mut keepalive = interval_at(Instant::now() + keepalive_every, keepalive_every);
            let mut audio_since_tick = false;
            // Only engine messages count; our own audio and KeepAlives do not.
            let mut last_engine_msg = Instant::now();

            loop {
                tokio::select! {
                    Some(audio_data) = ws_rx.recv() => {
                        if let Err(e) = ws_sink.send(Message::Binary(audio_data)).await {
                            let stt_error = STTError::NetworkError(format!(
                                "Failed to send audio to Deepgram: {e}"
                            ));
                            error!(call_id = %call_id, "{}", stt_error);
                            let _ = error_tx.try_send(stt_error);
                            break;
                        }
                        audio_since_tick = true;
                    }

                    _ = keepalive.tick() => {
                        if !audio_since_tick {
                            let keep_alive = ControlMessage::keep_alive().to_json();
                            if let Err(e) = ws_sink.send(Message::Text(keep_alive.into())).await {
                                warn!(call_id = %call_id, "Failed to send KeepAlive: {}", e);
                            }
                        }
                        audio_since_tick = false;
                    }

                    message = ws_stream.next() => {
                        last_engine_msg = Instant::now();
                        match message {
                            Some(Ok(msg)) => {
                                match Self::handle_websocket_message(msg, &result_tx).await {
                                    Ok(true) => {}
                                    Ok(false) => {
                                        let _ = error_tx.try_send(STTError::Closed(
                                            "Deepgram ended the stream".to_string(),
                                        ));
                                        break;
                                    }
                                    Err(e) => {
                                        error!(call_id = %call_id, "Deepgram streaming error: {}", e);
                                        let _ = error_tx.try_send(e);
                                        break;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                let stt_error = STTError::NetworkError(format!("WebSocket error: {e}"));
                                error!(call_id = %call_id, "{}", stt_error);
                                let _ = error_tx.try_send(stt_error);
                                break;
                            }
                            None => {
                                info!(call_id = %call_id, "Deepgram WebSocket stream ended");
                                let _ = error_tx.try_send(STTError::Closed(
                                    "Deepgram connection dropped".to_string(),
                                ));
                                break;
                            }
                        }
                    }

                    _ = sleep_until(last_engine_msg + idle_timeout) => {
                        let stt_error = STTError::NetworkError(format!(
                            "WebSocket idle timeout - no message from Deepgram for {:?}",
                            idle_timeout
                        ));
                        error!(call_id = %call_id, "{}", stt_error);
                        let _ = error_tx.try_send(stt_error);
                        break;
                    }

                    _ = &mut shutdown_rx => {
                        debug!(call_id = %call_id, "Closing Deepgram stream");
                        let close_stream = ControlMessage::close_stream().to_json();
                        let _ = ws_sink.send(Message::Text(close_stream.into())).await;
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            is_connected.store(false, Ordering::Release);
            info!(call_id = %call_id, "Deepgram connection closed");
        });

        self.connection_handle = Some(connection_handle);

        let callback_ref = self.transcript_callback.clone();
        self.result_forward_handle = Some(tokio::spawn(async move {
            while let Some(event) = result_rx.recv().await {
                let callback = callback_ref.lock().await.clone();
                match callback {
                    Some(callback) => callback(event).await,
                    None => debug!("Deepgram transcript (no callback): {}", event.text),
                }
            }
        }));

        let error_callback_ref = self.error_callback.clone();
        self.error_forward_handle = Some(tokio::spawn(async move {
            while let Some(error) = error_rx.recv().await {
                let callback = error_callback_ref.lock().await.clone();
                match callback {
                    Some(callback) => callback(error).await,
                    None => error!("Deepgram error (no callback registered): {}", error),
                }
            }
        }));

        Ok(Box::pin(async move {
            match connected_rx.await {
                Ok(result) => result,
                Err(_) => Err(STTError::ConnectionFailed(
                    "Connection task ended before handshake".to_string(),
                )),
            }
        }))
    }

    fn is_ready(&self) -> bool {
        !self.closed && self.ws_sender.is_some() && self.is_connected.load(Ordering::Acquire)
    }

    async fn send_audio(&mut self, audio: Bytes) -> Result<bool, STTError> {
        if !self.is_ready() {
            return Ok(false);
        }

        if audio.len() > MAX_AUDIO_CHUNK_SIZE {
            return Err(STTError::InvalidAudioFormat(format!(
                "Audio chunk size {} bytes exceeds maximum {} bytes",
                audio.len(),
                MAX_AUDIO_CHUNK_SIZE
            )));
        }

        let Some(ws_sender) = &self.ws_sender else {
            return Ok(false);
        };

        match ws_sender.try_send(audio) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                // Engine socket is backed up; realtime audio is dropped, not queued.
                debug!("Deepgram audio channel full; dropping chunk");
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => {
                // Connection task is gone; treat the link as dead.
                self.is_connected.store(false, Ordering::Release);
                self.ws_sender = None;
                Ok(false)
            }
        }
    }

    async fn on_transcript(&mut self, callback: TranscriptCallback) -> Result<(), STTError> {
        *self.transcript_callback.lock().await = Some(callback);
        Ok(())
    }

    async fn on_error(&mut self, callback: LinkErrorCallback) -> Result<(), STTError> {
        *self.error_callback.lock().await = Some(callback);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), STTError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ws_sender = None;

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(mut handle) = self.connection_handle.take()
            && timeout(CLOSE_WAIT, &mut handle).await.is_err()
        {
            warn!("Deepgram connection task did not stop within {:?}", CLOSE_WAIT);
            handle.abort();
        }

        for handle in [
            self.result_forward_handle.take(),
            self.error_forward_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
            let _ = handle.await;
        }

        *self.transcript_callback.lock().await = None;
        *self.error_callback.lock().await = None;
        self.is_connected.store(false, Ordering::Release);

        debug!("Deepgram link closed");
        Ok(())
    }

    fn provider_info(&self) -> &'static str {
        "Deepgram Live Streaming"
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds one [`DeepgramLink`] per call from a shared configuration.
#[derive(Debug, Clone)]
pub struct DeepgramLinkFactory {
    config: DeepgramLinkConfig,
}

impl DeepgramLinkFactory {
    pub fn new(config: DeepgramLinkConfig) -> Self {
        Self { config }
    }
}

impl LinkFactory for DeepgramLinkFactory {
    fn create(&self) -> Result<Box<dyn TranscriptionLink>, STTError> {
        Ok(Box::new(DeepgramLink::new(self.config.clone())?))
    }
}
