use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_128;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TTSError {
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Empty text")]
    EmptyText,
    #[error("Empty audio returned by provider")]
    EmptyAudio,
}

pub type TTSResult<T> = Result<T, TTSError>;

/// Playable audio produced for one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub data: Bytes,
    /// MIME type, e.g. `audio/mpeg`.
    pub content_type: &'static str,
    /// File extension used when persisting, e.g. `mp3`.
    pub extension: &'static str,
}

impl SynthesizedAudio {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Text-to-speech conversion, request/response style.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> TTSResult<SynthesizedAudio>;

    /// Voice identity; part of the cache key for stored audio.
    fn voice(&self) -> &str;

    fn provider_info(&self) -> &'static str;

    /// Stable key for `text` spoken by this synthesizer's voice.
    fn audio_key(&self, text: &str) -> String {
        let mut s = String::with_capacity(text.len() + 32);
        s.push_str(self.provider_info());
        s.push('|');
        s.push_str(self.voice());
        s.push('|');
        s.push_str(text.trim());
        format!("{:032x}", xxh3_128(s.as_bytes()))
    }
}

/// Stands in when no synthesis credentials are configured; every request fails.
pub struct UnconfiguredSynthesizer;

#[async_trait]
impl Synthesizer for UnconfiguredSynthesizer {
    async fn synthesize(&self, _text: &str) -> TTSResult<SynthesizedAudio> {
        Err(TTSError::InvalidConfiguration(
            "no text-to-speech API key configured".to_string(),
        ))
    }

    fn voice(&self) -> &str {
        "none"
    }

    fn provider_info(&self) -> &'static str {
        "unconfigured"
    }
}
