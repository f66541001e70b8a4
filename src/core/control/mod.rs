//! Call control: steering a live call once a reply is ready.
//!
//! A [`CallControl`] turns a [`ReplyDirective`] into exactly one action on
//! the telephony control plane. The action plays the reply audio and then
//! re-arms listening so the caller can take the next turn.

mod rest;
pub mod twiml;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::pipeline::ReplyDirective;

pub use rest::{
    CallUpdate, DEFAULT_TELEPHONY_API_BASE, DirectiveBoard, RedirectControl, RestUpdateControl,
    TelephonyClient, UnconfiguredControl, rearm_only_twiml,
};
pub use twiml::{Gather, TwimlResponse};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("Control plane request failed: {0}")]
    Network(String),
    #[error("Control plane rejected update ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Call control not configured: {0}")]
    NotConfigured(String),
    #[error("Invalid call id: {0}")]
    InvalidCallId(String),
}

#[async_trait]
pub trait CallControl: Send + Sync {
    /// Dispatch the single control action for one turn.
    async fn dispatch(&self, directive: &ReplyDirective) -> Result<(), ControlError>;

    fn mode(&self) -> DispatchMode;
}

/// How reply audio reaches a live call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Push an inline TwiML document through the call-update API.
    #[default]
    RestUpdate,
    /// Point the call at `/voice/reply/{call_id}`, which serves the document.
    Redirect,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "rest_update" | "rest" | "update" => Ok(Self::RestUpdate),
            "redirect" => Ok(Self::Redirect),
            other => Err(format!("Unknown dispatch mode: {other}")),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RestUpdate => "rest_update",
            Self::Redirect => "redirect",
        })
    }
}

/// How the answer webhook captures caller speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMode {
    /// Bidirectional media stream bridged to live transcription.
    #[default]
    Stream,
    /// Platform-side speech recognition posting to `/voice/gather`.
    Gather,
}

impl FromStr for IntegrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" | "media_stream" => Ok(Self::Stream),
            "gather" | "turn" => Ok(Self::Gather),
            other => Err(format!("Unknown integration mode: {other}")),
        }
    }
}

impl fmt::Display for IntegrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stream => "stream",
            Self::Gather => "gather",
        })
    }
}

pub const GATHER_PATH: &str = "/voice/gather";
pub const REPLY_PATH: &str = "/voice/reply";

/// What follows the reply audio so the caller can speak again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rearm {
    /// Reopen the media stream for the same call.
    Stream { public_url: String },
    /// Hand speech capture back to the platform.
    Gather { language: Option<String> },
}

impl Rearm {
    pub fn for_mode(mode: IntegrationMode, public_url: &str, language: Option<String>) -> Self {
        match mode {
            IntegrationMode::Stream => Rearm::Stream {
                public_url: public_url.to_string(),
            },
            IntegrationMode::Gather => Rearm::Gather { language },
        }
    }

    pub fn apply(&self, response: TwimlResponse, call_id: &str) -> TwimlResponse {
        match self {
            Rearm::Stream { public_url } => response.connect_stream(
                stream_url(public_url, call_id),
                [("callId".to_string(), call_id.to_string())],
            ),
            Rearm::Gather { language } => {
                let gather = Gather::speech(GATHER_PATH);
                let gather = match language {
                    Some(language) => gather.language(language.clone()),
                    None => gather,
                };
                response.gather(gather)
            }
        }
    }
}

/// The document that plays a reply and re-arms listening.
pub fn reply_twiml(directive: &ReplyDirective, rearm: &Rearm) -> String {
    let response = TwimlResponse::new().play(&directive.audio_url);
    rearm.apply(response, &directive.call_id).render()
}

/// `wss://` URL of the media-stream endpoint for `call_id`.
pub fn stream_url(public_url: &str, call_id: &str) -> String {
    let base = public_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("wss://{base}")
    };
    format!("{ws_base}/stream/{call_id}")
}

/// Call ids travel in URL paths; keep them to a safe alphabet.
pub fn is_valid_call_id(call_id: &str) -> bool {
    !call_id.is_empty()
        && call_id.len() <= 64
        && call_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
