//! Telephony webhooks
//!
//! All three endpoints answer with TwiML. Failures are handled locally so the
//! platform always receives a playable document.

use std::sync::Arc;

use axum::{
    Form,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::control::{
    GATHER_PATH, Gather, IntegrationMode, Rearm, TwimlResponse, is_valid_call_id, rearm_only_twiml,
    reply_twiml, stream_url,
};
use crate::errors::app_error::AppError;
use crate::state::AppState;

const TWIML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Turn number used for platform-gathered speech, which has no session.
const GATHER_TURN: u64 = 0;

/// Call-answer webhook form. Only the fields the bridge reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
}

/// Speech-result webhook form posted by `<Gather input="speech">`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatherForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "SpeechResult")]
    pub speech_result: Option<String>,
    #[serde(rename = "Confidence")]
    pub confidence: Option<f32>,
}

fn twiml(document: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(TWIML_CONTENT_TYPE))],
        document,
    )
        .into_response()
}

fn gather_with_prompt(state: &AppState, prompt: &str) -> TwimlResponse {
    TwimlResponse::new().gather(
        Gather::speech(GATHER_PATH)
            .language(state.config.stt_language.clone())
            .prompt(prompt),
    )
}

fn reprompt(state: &AppState) -> Response {
    twiml(gather_with_prompt(state, &state.config.reprompt).render())
}

/// `POST /voice` - answer an inbound call.
///
/// Stream mode greets the caller and connects a media stream to
/// `/stream/{CallSid}`; gather mode hands speech capture to the platform.
pub async fn answer_call(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AnswerForm>,
) -> Response {
    let call_id = form.call_sid.as_deref().filter(|id| is_valid_call_id(id));
    info!(
        call_id = ?call_id,
        from = ?form.from,
        to = ?form.to,
        mode = %state.config.integration_mode,
        "Answering inbound call"
    );

    let document = match state.config.integration_mode {
        IntegrationMode::Stream => {
            let response = TwimlResponse::new().say(state.config.greeting.clone());
            match call_id {
                Some(call_id) => state.rearm.apply(response, call_id),
                None => {
                    warn!("Answer webhook without a usable CallSid; stream will identify itself");
                    let url = stream_url(&state.config.public_url, "");
                    response.connect_stream(url.trim_end_matches('/'), Vec::new())
                }
            }
        }
        IntegrationMode::Gather => gather_with_prompt(&state, &state.config.greeting),
    };

    twiml(document.render())
}

/// `POST /voice/gather` - one turn of platform-recognized speech.
///
/// Runs decision and synthesis inline and answers with the reply audio
/// followed by a fresh `<Gather>`. Empty speech re-prompts.
pub async fn gather_speech(
    State(state): State<Arc<AppState>>,
    Form(form): Form<GatherForm>,
) -> Response {
    let call_id = form.call_sid.unwrap_or_default();
    let speech = form.speech_result.unwrap_or_default();
    let speech = speech.trim();

    if speech.is_empty() {
        debug!(call_id = %call_id, "Empty speech result; re-prompting");
        return reprompt(&state);
    }

    info!(
        call_id = %call_id,
        confidence = ?form.confidence,
        utterance = %speech,
        "Speech gathered"
    );

    let rearm = Rearm::Gather {
        language: Some(state.config.stt_language.clone()),
    };
    let pipeline = state.pipeline.clone();
    match timeout(
        pipeline.timeout(),
        pipeline.prepare(&call_id, GATHER_TURN, speech),
    )
    .await
    {
        Ok(Ok(directive)) => twiml(reply_twiml(&directive, &rearm)),
        Ok(Err(e)) => {
            warn!(call_id = %call_id, stage = e.stage(), "Gathered turn failed: {}", e);
            reprompt(&state)
        }
        Err(_) => {
            warn!(call_id = %call_id, "Gathered turn timed out");
            reprompt(&state)
        }
    }
}

/// `POST /voice/reply/{call_id}` - redirect target for dispatched replies.
///
/// Serves the pending document once; afterwards only re-arms listening.
pub async fn serve_reply(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Response, AppError> {
    if !is_valid_call_id(&call_id) {
        return Err(AppError::BadRequest(format!("Invalid call id: {call_id}")));
    }

    match state.directive_board.take(&call_id) {
        Some(document) => {
            info!(call_id = %call_id, "Serving pending reply");
            Ok(twiml(document))
        }
        None => {
            debug!(call_id = %call_id, "No pending reply; re-arming only");
            Ok(twiml(rearm_only_twiml(&state.rearm, &call_id)))
        }
    }
}
