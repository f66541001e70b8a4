//! Wire types for the telephony media-stream transport.
//!
//! Inbound frames are JSON text messages tagged by `event`. Only the fields
//! the bridge consumes are modelled; everything else is ignored by serde.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Envelope used to read the `event` discriminator before the full parse.
#[derive(Debug, Deserialize)]
pub(crate) struct EventEnvelope<'a> {
    #[serde(borrow)]
    pub event: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartEnvelope {
    #[serde(default)]
    pub stream_sid: Option<String>,
    pub start: StartPayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartPayload {
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// Audio format announced by the platform in the `start` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MediaEnvelope<'a> {
    #[serde(borrow)]
    pub media: MediaPayload<'a>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MediaPayload<'a> {
    #[serde(default, borrow)]
    pub track: Option<&'a str>,
    #[serde(default, borrow)]
    pub chunk: Option<&'a str>,
    #[serde(borrow)]
    pub payload: Cow<'a, str>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StopEnvelope {
    #[serde(default)]
    pub stop: Option<StopPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StopPayload {
    #[serde(default)]
    pub call_sid: Option<String>,
}

// =============================================================================
// Outbound frames
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OutboundMedia<'a> {
    pub event: &'static str,
    pub stream_sid: &'a str,
    pub media: OutboundMediaPayload,
}

#[derive(Debug, Serialize)]
pub(crate) struct OutboundMediaPayload {
    pub payload: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OutboundClear<'a> {
    pub event: &'static str,
    pub stream_sid: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OutboundMark<'a> {
    pub event: &'static str,
    pub stream_sid: &'a str,
    pub mark: MarkPayload<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MarkPayload<'a> {
    pub name: &'a str,
}
