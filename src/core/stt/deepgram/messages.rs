//! Deepgram live-streaming message types.

use serde::{Deserialize, Serialize};

use crate::core::stt::base::TranscriptEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum DeepgramMessage {
    Results(ResultsMessage),
    Metadata(MetadataMessage),
    UtteranceEnd(UtteranceEndMessage),
    SpeechStarted(SpeechStartedMessage),
    Unknown(String),
}

impl DeepgramMessage {
    /// Parse a text frame, dispatching on its `type` field.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct TypePeek {
            #[serde(rename = "type")]
            message_type: String,
        }

        let peek: TypePeek = serde_json::from_str(text)?;

        match peek.message_type.as_str() {
            "Results" => Ok(Self::Results(serde_json::from_str(text)?)),
            "Metadata" => Ok(Self::Metadata(serde_json::from_str(text)?)),
            "UtteranceEnd" => Ok(Self::UtteranceEnd(serde_json::from_str(text)?)),
            "SpeechStarted" => Ok(Self::SpeechStarted(serde_json::from_str(text)?)),
            _ => Ok(Self::Unknown(text.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultsMessage {
    pub channel: Channel,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
}

impl ResultsMessage {
    /// Convert the top alternative into a transcript event.
    pub fn to_event(&self) -> TranscriptEvent {
        let (text, confidence) = self
            .channel
            .alternatives
            .first()
            .map(|alt| (alt.transcript.trim().to_string(), alt.confidence))
            .unwrap_or_default();

        TranscriptEvent::new(
            text,
            self.is_final,
            self.speech_final,
            confidence.clamp(0.0, 1.0),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetadataMessage {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub model_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UtteranceEndMessage {
    #[serde(default)]
    pub last_word_end: f64,
}

impl UtteranceEndMessage {
    /// An empty end-of-turn marker; the turn controller flushes what it has.
    pub fn to_event(&self) -> TranscriptEvent {
        TranscriptEvent::new("", false, true, 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeechStartedMessage {
    #[serde(default)]
    pub timestamp: f64,
}

/// Client control message (`KeepAlive`, `CloseStream`, `Finalize`).
#[derive(Debug, Clone, Serialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub message_type: &'static str,
}

impl ControlMessage {
    pub const fn keep_alive() -> Self {
        Self {
            message_type: "KeepAlive",
        }
    }

    pub const fn close_stream() -> Self {
        Self {
            message_type: "CloseStream",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
