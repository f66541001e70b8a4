//! Request parameters for the OpenAI speech endpoint.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::tts::base::TTSError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

// =============================================================================
// Models
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAITTSModel {
    #[default]
    #[serde(rename = "tts-1")]
    Tts1,
    #[serde(rename = "tts-1-hd")]
    Tts1Hd,
    #[serde(rename = "gpt-4o-mini-tts")]
    Gpt4oMiniTts,
}

impl OpenAITTSModel {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tts1 => "tts-1",
            Self::Tts1Hd => "tts-1-hd",
            Self::Gpt4oMiniTts => "gpt-4o-mini-tts",
        }
    }
}

impl FromStr for OpenAITTSModel {
    type Err = TTSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tts-1" | "tts1" => Ok(Self::Tts1),
            "tts-1-hd" | "tts1-hd" => Ok(Self::Tts1Hd),
            "gpt-4o-mini-tts" => Ok(Self::Gpt4oMiniTts),
            other => Err(TTSError::InvalidConfiguration(format!(
                "Unknown TTS model: {other}"
            ))),
        }
    }
}

// =============================================================================
// Voices
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIVoice {
    #[default]
    Alloy,
    Ash,
    Coral,
    Echo,
    Fable,
    Nova,
    Onyx,
    Sage,
    Shimmer,
}

impl OpenAIVoice {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Fable => "fable",
            Self::Nova => "nova",
            Self::Onyx => "onyx",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
        }
    }
}

impl FromStr for OpenAIVoice {
    type Err = TTSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "ash" => Self::Ash,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "fable" => Self::Fable,
            "nova" => Self::Nova,
            "onyx" => Self::Onyx,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            other => {
                return Err(TTSError::InvalidConfiguration(format!(
                    "Unknown TTS voice: {other}"
                )));
            }
        })
    }
}

// =============================================================================
// Output format
// =============================================================================

/// Formats a telephony platform can `<Play>` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioOutputFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioOutputFormat {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }

    #[inline]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
        }
    }
}

/// Full configuration for [`super::OpenAISynthesizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAITTSConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: OpenAITTSModel,
    pub voice: OpenAIVoice,
    pub response_format: AudioOutputFormat,
    /// 0.25 to 4.0; 1.0 is omitted from requests.
    pub speed: f32,
}

impl Default for OpenAITTSConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: OpenAITTSModel::default(),
            voice: OpenAIVoice::default(),
            response_format: AudioOutputFormat::default(),
            speed: 1.0,
        }
    }
}

impl OpenAITTSConfig {
    /// Parse model and voice names, e.g. from configuration files.
    pub fn from_names(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: &str,
        voice: &str,
    ) -> Result<Self, TTSError> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.parse()?,
            voice: voice.parse()?,
            ..Default::default()
        })
    }

    pub fn speech_url(&self) -> String {
        format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'))
    }
}
