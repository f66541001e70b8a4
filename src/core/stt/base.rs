use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audio parameters negotiated with the transcription engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct STTConfig {
    pub api_key: String,
    pub language: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub punctuation: bool,
    pub encoding: String,
    pub model: String,
}

impl Default for STTConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            language: "en-US".to_string(),
            // Telephony media streams are 8 kHz mono mu-law.
            sample_rate: 8000,
            channels: 1,
            punctuation: true,
            encoding: "mulaw".to_string(),
            model: "nova-2-phonecall".to_string(),
        }
    }
}

/// One incremental or final transcript fragment from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    /// The engine will not revise this segment.
    pub is_final: bool,
    /// The engine detected the end of the speaker's utterance.
    pub end_of_turn: bool,
    pub confidence: f32,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, is_final: bool, end_of_turn: bool, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final,
            end_of_turn,
            confidence,
        }
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self::new(text, false, false, 0.0)
    }

    pub fn final_segment(text: impl Into<String>) -> Self {
        Self::new(text, true, false, 1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Length signal in characters.
    pub fn len(&self) -> usize {
        self.text.trim().chars().count()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum STTError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),
    #[error("Handshake timed out after {0} ms")]
    HandshakeTimeout(u64),
    #[error("Link closed: {0}")]
    Closed(String),
}

pub type TranscriptCallback =
    Arc<dyn Fn(TranscriptEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub type LinkErrorCallback =
    Arc<dyn Fn(STTError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Resolves once the remote handshake completes (or fails).
pub type LinkHandshake = Pin<Box<dyn Future<Output = Result<(), STTError>> + Send>>;

/// One outbound streaming connection to a speech-to-text engine.
///
/// A link belongs to exactly one call session. `open` starts the connection
/// in the background and hands back the handshake future; the link only
/// reports ready after that future resolves successfully. Audio sent before
/// readiness, or after a connection-level failure, is dropped rather than
/// queued.
#[async_trait]
pub trait TranscriptionLink: Send {
    /// Start connecting. The returned future resolves when the engine accepts
    /// the stream.
    async fn open(&mut self, call_id: &str) -> Result<LinkHandshake, STTError>;

    fn is_ready(&self) -> bool;

    /// Forward one raw audio chunk. `Ok(false)` means the chunk was dropped
    /// because the link is not ready or already closed.
    async fn send_audio(&mut self, audio: Bytes) -> Result<bool, STTError>;

    /// Register the transcript callback. Events arrive in engine order.
    async fn on_transcript(&mut self, callback: TranscriptCallback) -> Result<(), STTError>;

    /// Register the callback for connection-level errors after the handshake.
    async fn on_error(&mut self, callback: LinkErrorCallback) -> Result<(), STTError>;

    /// Tear down the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), STTError>;

    fn provider_info(&self) -> &'static str;
}

/// Creates fresh links, one per session and one per retry.
pub trait LinkFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn TranscriptionLink>, STTError>;
}
