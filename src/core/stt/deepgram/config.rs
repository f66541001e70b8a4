//! Configuration for the Deepgram live-streaming link.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::stt::base::{STTConfig, STTError};

pub const DEFAULT_DEEPGRAM_URL: &str = "wss://api.deepgram.com";

/// Audio encodings the bridge can forward without transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeepgramEncoding {
    /// 8-bit G.711 mu-law, what telephony media streams carry.
    #[default]
    Mulaw,
    /// 8-bit G.711 A-law.
    Alaw,
    /// 16-bit little-endian PCM.
    Linear16,
}

impl DeepgramEncoding {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mulaw => "mulaw",
            Self::Alaw => "alaw",
            Self::Linear16 => "linear16",
        }
    }
}

impl FromStr for DeepgramEncoding {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mulaw" | "ulaw" | "pcm_mulaw" | "audio/x-mulaw" => Ok(Self::Mulaw),
            "alaw" | "pcm_alaw" | "audio/x-alaw" => Ok(Self::Alaw),
            "linear16" | "pcm" | "pcm_s16le" | "audio/l16" => Ok(Self::Linear16),
            other => Err(STTError::ConfigurationError(format!(
                "Unsupported Deepgram encoding: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for DeepgramEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeepgramLinkConfig {
    pub base: STTConfig,
    /// Scheme and host, e.g. `wss://api.deepgram.com`; `/v1/listen` is appended.
    pub base_url: String,
    pub encoding: DeepgramEncoding,
    pub interim_results: bool,
    /// Engine-side endpointing window in milliseconds.
    pub endpointing_ms: Option<u32>,
    /// Word-gap after which Deepgram sends `UtteranceEnd`. Requires interim results.
    pub utterance_end_ms: Option<u32>,
    pub keepalive_interval: Duration,
    /// Maximum silence from the engine before the link is declared dead.
    pub idle_timeout: Duration,
}

impl DeepgramLinkConfig {
    /// Build a link configuration from the shared STT parameters.
    pub fn from_base(base: STTConfig) -> Result<Self, STTError> {
        let encoding = base.encoding.parse()?;
        Ok(Self {
            base,
            base_url: DEFAULT_DEEPGRAM_URL.to_string(),
            encoding,
            interim_results: true,
            endpointing_ms: Some(300),
            utterance_end_ms: Some(1000),
            keepalive_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build_websocket_url(&self) -> Result<Url, STTError> {
        let mut url = Url::parse(self.base_url.trim_end_matches('/')).map_err(|e| {
            STTError::ConfigurationError(format!("Invalid Deepgram URL {}: {e}", self.base_url))
        })?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(STTError::ConfigurationError(format!(
                "Deepgram URL must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        url.set_path("/v1/listen");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("encoding", self.encoding.as_str())
                .append_pair("sample_rate", &self.base.sample_rate.to_string())
                .append_pair("channels", &self.base.channels.to_string())
                .append_pair("punctuate", bool_str(self.base.punctuation))
                .append_pair("interim_results", bool_str(self.interim_results));

            if !self.base.model.is_empty() {
                query.append_pair("model", &self.base.model);
            }
            if !self.base.language.is_empty() {
                query.append_pair("language", &self.base.language);
            }
            if let Some(endpointing) = self.endpointing_ms {
                query.append_pair("endpointing", &endpointing.to_string());
            }
            if let Some(utterance_end) = self.utterance_end_ms
                && self.interim_results
            {
                query.append_pair("utterance_end_ms", &utterance_end.to_string());
            }
        }

        Ok(url)
    }
}

#[inline]
fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
