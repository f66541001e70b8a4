use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::config::OpenAITTSConfig;
use crate::core::tts::base::{SynthesizedAudio, Synthesizer, TTSError, TTSResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Longest reply the endpoint accepts in one request.
const MAX_INPUT_CHARS: usize = 4096;

pub struct OpenAISynthesizer {
    client: reqwest::Client,
    config: OpenAITTSConfig,
}

impl OpenAISynthesizer {
    pub fn new(config: OpenAITTSConfig) -> TTSResult<Self> {
        if config.api_key.is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "API key is required for OpenAI TTS".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TTSError::InvalidConfiguration(format!("HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let mut body = json!({
            "model": self.config.model.as_str(),
            "input": text,
            "voice": self.config.voice.as_str(),
            "response_format": self.config.response_format.as_str(),
        });

        let speed = self.config.speed.clamp(0.25, 4.0);
        if (speed - 1.0).abs() > 0.001 {
            body["speed"] = json!(speed);
        }

        body
    }
}

#[async_trait]
impl Synthesizer for OpenAISynthesizer {
    async fn synthesize(&self, text: &str) -> TTSResult<SynthesizedAudio> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TTSError::EmptyText);
        }
        if text.chars().count() > MAX_INPUT_CHARS {
            return Err(TTSError::ProviderError(format!(
                "Reply exceeds {MAX_INPUT_CHARS} characters"
            )));
        }

        let response = self
            .client
            .post(self.config.speech_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| TTSError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "OpenAI TTS request failed: {}", body);
            return Err(TTSError::ProviderError(format!(
                "OpenAI TTS returned {status}: {body}"
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| TTSError::NetworkError(e.to_string()))?;
        if data.is_empty() {
            return Err(TTSError::EmptyAudio);
        }

        debug!(bytes = data.len(), "Synthesized reply audio");

        let format = self.config.response_format;
        Ok(SynthesizedAudio {
            data,
            content_type: format.mime_type(),
            extension: format.as_str(),
        })
    }

    fn voice(&self) -> &str {
        self.config.voice.as_str()
    }

    fn provider_info(&self) -> &'static str {
        "OpenAI TTS"
    }
}
