//! One call's session task.
//!
//! A [`CallSession`] owns the inbound media stream, the transcription link
//! and the turn state. Everything that touches that state runs on the
//! session task: link callbacks, handshake watchers and reply pipelines post
//! [`SessionEvent`]s to the session inbox instead of mutating anything
//! themselves.

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::SessionRegistry;
use super::state::SessionState;
use super::turn::{TurnController, TurnSettings};
use crate::core::codec::{self, StreamFrame, StreamStart};
use crate::core::pipeline::{PipelineError, ReplyDirective, ReplyPipeline};
use crate::core::stt::{
    LinkErrorCallback, LinkFactory, LinkHandshake, STTError, TranscriptCallback, TranscriptEvent,
    TranscriptionLink,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub turn: TurnSettings,
    pub handshake_timeout: Duration,
    /// Fresh links attempted after a failure before the session gives up.
    pub max_link_retries: u32,
    pub inbound_idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            turn: TurnSettings::default(),
            handshake_timeout: Duration::from_secs(5),
            max_link_retries: 1,
            inbound_idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Shared dependencies handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub link_factory: Arc<dyn LinkFactory>,
    pub pipeline: Arc<ReplyPipeline>,
    pub settings: SessionSettings,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("Transcription link unavailable after {attempts} attempt(s): {source}")]
    LinkUnavailable { attempts: u32, source: STTError },
    #[error("No inbound frames for {0:?}")]
    IdleTimeout(Duration),
    #[error("Superseded by a newer session for the same call")]
    Superseded,
}

/// What happened during a session, returned when it ends.
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub call_id: Option<String>,
    pub connection_id: String,
    pub final_state: SessionState,
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
    pub frames_malformed: u64,
    pub link_attempts: u32,
    pub error: Option<SessionError>,
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
    LinkReady {
        link: u64,
    },
    LinkFailed {
        link: u64,
        error: STTError,
    },
    Transcript {
        link: u64,
        event: TranscriptEvent,
    },
    TurnFinished {
        turn: u64,
        outcome: Result<ReplyDirective, PipelineError>,
    },
}

enum Flow {
    Continue,
    Stop,
}

pub struct CallSession {
    ctx: SessionContext,
    connection_id: String,
    call_id: Option<String>,
    stream_sid: Option<String>,
    generation: Option<u64>,
    state: SessionState,

    link: Option<Box<dyn TranscriptionLink>>,
    /// Sequence number of the current link; events from older links are ignored.
    link_seq: u64,
    link_attempts: u32,
    link_ready: bool,
    caller_audio_flowing: bool,

    turn: TurnController,
    turn_counter: u64,
    turn_in_flight: Option<u64>,
    /// Turn completed while another was in flight.
    queued_turn: Option<String>,

    live: CancellationToken,
    inbox_tx: mpsc::UnboundedSender<SessionEvent>,
    inbox_rx: mpsc::UnboundedReceiver<SessionEvent>,

    summary: SessionSummary,
}

impl CallSession {
    /// `call_id` is known up front when the stream URL carries it; otherwise
    /// it is taken from the `start` event.
    pub fn new(ctx: SessionContext, call_id: Option<String>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4().to_string();
        let turn = TurnController::new(ctx.settings.turn.clone());

        Self {
            ctx,
            summary: SessionSummary {
                connection_id: connection_id.clone(),
                ..Default::default()
            },
            connection_id,
            call_id,
            stream_sid: None,
            generation: None,
            state: SessionState::Connecting,
            link: None,
            link_seq: 0,
            link_attempts: 0,
            link_ready: false,
            caller_audio_flowing: false,
            turn,
            turn_counter: 0,
            turn_in_flight: None,
            queued_turn: None,
            live: CancellationToken::new(),
            inbox_tx,
            inbox_rx,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the inbound stream ends or the session fails.
    pub async fn run<S>(mut self, mut inbound: S) -> SessionSummary
    where
        S: Stream<Item = String> + Unpin,
    {
        if let Some(call_id) = self.call_id.clone() {
            self.register(&call_id);
        }
        self.open_link().await;

        let idle_timeout = self.ctx.settings.inbound_idle_timeout;
        let mut last_inbound = Instant::now();

        loop {
            let silence_deadline = self.turn.silence_deadline();

            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(text) => {
                        last_inbound = Instant::now();
                        if let Flow::Stop = self.on_inbound(&text).await {
                            break;
                        }
                    }
                    None => {
                        debug!(call_id = %self.label(), "Inbound stream closed");
                        break;
                    }
                },

                Some(event) = self.inbox_rx.recv() => {
                    if let Flow::Stop = self.on_event(event).await {
                        break;
                    }
                }

                _ = sleep_until_opt(silence_deadline) => {
                    if let Some(text) = self.turn.on_silence(Instant::now()) {
                        self.complete_turn(text);
                    }
                }

                _ = sleep_until(last_inbound + idle_timeout) => {
                    warn!(call_id = %self.label(), "No inbound frames for {:?}; closing", idle_timeout);
                    self.summary.error = Some(SessionError::IdleTimeout(idle_timeout));
                    break;
                }

                _ = self.live.cancelled() => {
                    self.summary.error = Some(SessionError::Superseded);
                    break;
                }
            }
        }

        self.teardown().await
    }

    // =========================================================================
    // Inbound media stream
    // =========================================================================

    async fn on_inbound(&mut self, text: &str) -> Flow {
        match codec::decode_frame(text) {
            StreamFrame::Start(start) => self.on_start(start),
            StreamFrame::Media(audio) => self.forward_audio(audio).await,
            StreamFrame::Stop { .. } => {
                info!(call_id = %self.label(), "Media stream stopped");
                return Flow::Stop;
            }
            StreamFrame::Other(kind) => {
                debug!(call_id = %self.label(), event = %kind, "Ignoring stream event");
            }
            StreamFrame::Malformed(reason) => {
                self.summary.frames_malformed += 1;
                debug!(call_id = %self.label(), "Dropping malformed frame: {}", reason);
            }
        }
        Flow::Continue
    }

    fn on_start(&mut self, start: StreamStart) {
        match (self.call_id.clone(), start.call_sid) {
            (None, Some(call_sid)) => {
                self.call_id = Some(call_sid.clone());
                self.register(&call_sid);
            }
            (Some(call_id), Some(call_sid)) if call_id != call_sid => {
                warn!(call_id = %call_id, start_call_sid = %call_sid, "Stream start names a different call");
            }
            (None, None) => {
                warn!(connection_id = %self.connection_id, "Stream started without a call id; replies cannot be dispatched");
            }
            _ => {}
        }

        if !start.media_format.encoding.contains("mulaw") {
            warn!(
                call_id = %self.label(),
                encoding = %start.media_format.encoding,
                "Unexpected media encoding"
            );
        }

        self.stream_sid = start.stream_sid;
        self.caller_audio_flowing = true;
        info!(
            call_id = %self.label(),
            stream_sid = ?self.stream_sid,
            "Caller audio flowing"
        );
        self.maybe_start_streaming();
    }

    async fn forward_audio(&mut self, audio: Bytes) {
        if !(self.state.is_listening() && self.link_ready) {
            self.summary.frames_dropped += 1;
            return;
        }
        let Some(link) = self.link.as_mut() else {
            self.summary.frames_dropped += 1;
            return;
        };

        match link.send_audio(audio).await {
            Ok(true) => self.summary.frames_forwarded += 1,
            Ok(false) => self.summary.frames_dropped += 1,
            Err(e) => {
                self.summary.frames_dropped += 1;
                debug!(call_id = %self.label(), "Audio chunk rejected: {}", e);
            }
        }
    }

    // =========================================================================
    // Inbox
    // =========================================================================

    async fn on_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::LinkReady { link } if link == self.link_seq => {
                info!(call_id = %self.label(), attempt = self.link_attempts, "Transcription link ready");
                self.link_ready = true;
                self.link_attempts = 1;
                self.maybe_start_streaming();
            }
            SessionEvent::LinkFailed { link, error } if link == self.link_seq => {
                return self.on_link_failed(error).await;
            }
            SessionEvent::Transcript { link, event } if link == self.link_seq => {
                if let Some(text) = self.turn.observe(&event, Instant::now()) {
                    self.complete_turn(text);
                }
            }
            SessionEvent::TurnFinished { turn, outcome } => self.on_turn_finished(turn, outcome),
            stale => debug!(call_id = %self.label(), "Ignoring event from a replaced link: {:?}", stale),
        }
        Flow::Continue
    }

    async fn on_link_failed(&mut self, error: STTError) -> Flow {
        warn!(
            call_id = %self.label(),
            attempt = self.link_attempts,
            "Transcription link failed: {}",
            error
        );
        self.link_ready = false;
        if self.state == SessionState::Streaming {
            self.transition(SessionState::Connecting);
        }
        self.close_link().await;

        if self.link_attempts <= self.ctx.settings.max_link_retries {
            self.open_link().await;
            return Flow::Continue;
        }

        self.summary.error = Some(SessionError::LinkUnavailable {
            attempts: self.link_attempts,
            source: error,
        });
        Flow::Stop
    }

    // =========================================================================
    // Transcription link
    // =========================================================================

    async fn open_link(&mut self) {
        self.link_seq += 1;
        self.link_attempts += 1;
        self.summary.link_attempts += 1;
        let seq = self.link_seq;

        let mut link = match self.ctx.link_factory.create() {
            Ok(link) => link,
            Err(error) => {
                self.post(SessionEvent::LinkFailed { link: seq, error });
                return;
            }
        };

        let tx = self.inbox_tx.clone();
        let on_transcript: TranscriptCallback = Arc::new(move |event: TranscriptEvent| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(SessionEvent::Transcript { link: seq, event });
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let tx = self.inbox_tx.clone();
        let on_error: LinkErrorCallback = Arc::new(move |error: STTError| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(SessionEvent::LinkFailed { link: seq, error });
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let label = self.label().to_string();
        let registered = wire_link(link.as_mut(), &label, on_transcript, on_error).await;

        match registered {
            Ok(handshake) => {
                let tx = self.inbox_tx.clone();
                let limit = self.ctx.settings.handshake_timeout;
                tokio::spawn(async move {
                    let event = match timeout(limit, handshake).await {
                        Ok(Ok(())) => SessionEvent::LinkReady { link: seq },
                        Ok(Err(error)) => SessionEvent::LinkFailed { link: seq, error },
                        Err(_) => SessionEvent::LinkFailed {
                            link: seq,
                            error: STTError::HandshakeTimeout(limit.as_millis() as u64),
                        },
                    };
                    let _ = tx.send(event);
                });
                debug!(call_id = %self.label(), provider = link.provider_info(), "Opening transcription link");
            }
            Err(error) => self.post(SessionEvent::LinkFailed { link: seq, error }),
        }

        self.link = Some(link);
    }

    async fn close_link(&mut self) {
        self.link_ready = false;
        if let Some(mut link) = self.link.take()
            && let Err(e) = link.close().await
        {
            warn!(call_id = %self.label(), "Error closing transcription link: {}", e);
        }
    }

    // =========================================================================
    // Turns
    // =========================================================================

    fn complete_turn(&mut self, text: String) {
        if self.turn_in_flight.is_some() {
            let queued = match self.queued_turn.take() {
                Some(previous) => format!("{previous} {text}"),
                None => text,
            };
            debug!(call_id = %self.label(), "Turn queued behind in-flight reply");
            self.queued_turn = Some(queued);
            return;
        }
        self.start_turn(text);
    }

    fn start_turn(&mut self, utterance: String) {
        let Some(call_id) = self.call_id.clone() else {
            warn!(connection_id = %self.connection_id, "Dropping turn: call id unknown");
            return;
        };
        if self.state.is_terminal() {
            return;
        }

        self.turn_counter += 1;
        let turn = self.turn_counter;
        self.turn_in_flight = Some(turn);
        self.summary.turns_started += 1;
        if self.state == SessionState::Streaming {
            self.transition(SessionState::TurnPending);
        }
        info!(call_id = %call_id, turn, utterance = %utterance, "Caller turn complete");

        let pipeline = self.ctx.pipeline.clone();
        let live = self.live.clone();
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            let outcome = pipeline.respond(&call_id, turn, &utterance, &live).await;
            let _ = tx.send(SessionEvent::TurnFinished { turn, outcome });
        });
    }

    fn on_turn_finished(&mut self, turn: u64, outcome: Result<ReplyDirective, PipelineError>) {
        if self.turn_in_flight != Some(turn) {
            return;
        }
        self.turn_in_flight = None;

        match outcome {
            Ok(directive) => {
                self.summary.turns_completed += 1;
                info!(
                    call_id = %directive.call_id,
                    turn,
                    reply = %directive.reply_text,
                    audio_url = %directive.audio_url,
                    "Reply dispatched"
                );
            }
            Err(PipelineError::Cancelled) => {
                debug!(call_id = %self.label(), turn, "Reply abandoned; call ended");
            }
            Err(e) => {
                self.summary.turns_failed += 1;
                warn!(call_id = %self.label(), turn, stage = e.stage(), "Turn failed: {}", e);
            }
        }

        if self.state == SessionState::TurnPending {
            self.transition(SessionState::settle(self.legs_ready(), false));
        }

        if let Some(next) = self.queued_turn.take() {
            self.start_turn(next);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn register(&mut self, call_id: &str) {
        if self.generation.is_some() {
            return;
        }
        let generation = self
            .ctx
            .registry
            .register(call_id, &self.connection_id, self.live.clone());
        self.generation = Some(generation);
    }

    fn maybe_start_streaming(&mut self) {
        if self.state == SessionState::Connecting && self.legs_ready() {
            let next = SessionState::settle(true, self.turn_in_flight.is_some());
            self.transition(next);
        }
    }

    fn legs_ready(&self) -> bool {
        self.caller_audio_flowing && self.link_ready
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(call_id = %self.label(), from = %self.state, to = %next, "Session state");
            self.state = next;
        }
    }

    fn post(&self, event: SessionEvent) {
        let _ = self.inbox_tx.send(event);
    }

    fn label(&self) -> &str {
        self.call_id.as_deref().unwrap_or(&self.connection_id)
    }

    async fn teardown(mut self) -> SessionSummary {
        self.transition(SessionState::Closing);
        self.live.cancel();
        self.close_link().await;

        if let (Some(call_id), Some(generation)) = (self.call_id.as_deref(), self.generation) {
            self.ctx.registry.remove(call_id, generation);
        }
        self.transition(SessionState::Closed);

        let mut summary = std::mem::take(&mut self.summary);
        summary.call_id = self.call_id.take();
        summary.final_state = self.state;

        info!(
            call_id = ?summary.call_id,
            turns = summary.turns_started,
            forwarded = summary.frames_forwarded,
            dropped = summary.frames_dropped,
            error = ?summary.error,
            "Call session ended"
        );
        summary
    }
}

/// Register callbacks, then start the connection.
async fn wire_link(
    link: &mut dyn TranscriptionLink,
    call_id: &str,
    on_transcript: TranscriptCallback,
    on_error: LinkErrorCallback,
) -> Result<LinkHandshake, STTError> {
    link.on_transcript(on_transcript).await?;
    link.on_error(on_error).await?;
    link.open(call_id).await
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
