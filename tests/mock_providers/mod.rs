//! In-process mock collaborators for call-session tests
//!
//! - `MockLinkFactory` / `MockLink`: scripted transcription links whose
//!   callbacks the test drives directly
//! - `MockSynthesizer`: deterministic audio, optional failures and delay
//! - `RecordingControl`: captures dispatched reply directives
//!
//! Plus frame builders for the telephony media-stream protocol.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;

use callbridge::core::decision::{DEFAULT_FALLBACK_REPLY, default_rules};
use callbridge::core::stt::{LinkErrorCallback, LinkHandshake, TranscriptCallback};
use callbridge::session::SessionSettings;
use callbridge::{
    CallControl, ControlError, DispatchMode, KeywordDecision, LinkFactory, ObjectAudioStore,
    ReplyDirective, ReplyPipeline, STTError, SessionContext, SessionRegistry, SynthesizedAudio,
    Synthesizer, TTSError, TTSResult, TranscriptEvent, TranscriptionLink,
};

pub const AUDIO_BASE_URL: &str = "https://bridge.test";

// =============================================================================
// Transcription links
// =============================================================================

/// How a mock link's handshake resolves.
#[derive(Debug, Clone)]
pub enum Handshake {
    Succeed,
    Fail(STTError),
    /// Never resolves; the session's handshake timeout applies.
    Hang,
}

/// State of one created link, shared between the link and the test.
#[derive(Default)]
pub struct MockLinkShared {
    pub index: usize,
    call_id: Mutex<Option<String>>,
    audio: Mutex<Vec<Bytes>>,
    ready: AtomicBool,
    close_calls: AtomicUsize,
    on_transcript: Mutex<Option<TranscriptCallback>>,
    on_error: Mutex<Option<LinkErrorCallback>>,
}

impl MockLinkShared {
    pub fn call_id(&self) -> Option<String> {
        self.call_id.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn chunks(&self) -> usize {
        self.audio.lock().len()
    }

    pub fn audio_bytes(&self) -> Vec<u8> {
        self.audio.lock().iter().flat_map(|c| c.iter().copied()).collect()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Acquire)
    }

    /// Deliver a transcript as the engine would.
    pub async fn emit(&self, event: TranscriptEvent) {
        let callback = self.on_transcript.lock().clone();
        if let Some(callback) = callback {
            callback(event).await;
        }
    }

    /// Report a connection-level failure after the handshake.
    pub async fn fail(&self, error: STTError) {
        self.ready.store(false, Ordering::Release);
        let callback = self.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(error).await;
        }
    }
}

struct MockLink {
    shared: Arc<MockLinkShared>,
    handshake: Handshake,
    closed: bool,
}

#[async_trait]
impl TranscriptionLink for MockLink {
    async fn open(&mut self, call_id: &str) -> Result<LinkHandshake, STTError> {
        *self.shared.call_id.lock() = Some(call_id.to_string());
        match self.handshake.clone() {
            Handshake::Succeed => {
                let shared = self.shared.clone();
                Ok(Box::pin(async move {
                    shared.ready.store(true, Ordering::Release);
                    Ok(())
                }))
            }
            Handshake::Fail(error) => Ok(Box::pin(async move { Err(error) })),
            Handshake::Hang => Ok(Box::pin(std::future::pending())),
        }
    }

    fn is_ready(&self) -> bool {
        !self.closed && self.shared.is_ready()
    }

    async fn send_audio(&mut self, audio: Bytes) -> Result<bool, STTError> {
        if !self.is_ready() {
            return Ok(false);
        }
        self.shared.audio.lock().push(audio);
        Ok(true)
    }

    async fn on_transcript(&mut self, callback: TranscriptCallback) -> Result<(), STTError> {
        *self.shared.on_transcript.lock() = Some(callback);
        Ok(())
    }

    async fn on_error(&mut self, callback: LinkErrorCallback) -> Result<(), STTError> {
        *self.shared.on_error.lock() = Some(callback);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), STTError> {
        self.shared.close_calls.fetch_add(1, Ordering::AcqRel);
        self.closed = true;
        self.shared.ready.store(false, Ordering::Release);
        *self.shared.on_transcript.lock() = None;
        *self.shared.on_error.lock() = None;
        Ok(())
    }

    fn provider_info(&self) -> &'static str {
        "mock"
    }
}

/// Hands out mock links and remembers every one it created.
#[derive(Default)]
pub struct MockLinkFactory {
    links: Mutex<Vec<Arc<MockLinkShared>>>,
    /// Handshake outcomes for the next links; `Succeed` once exhausted.
    script: Mutex<VecDeque<Handshake>>,
}

impl MockLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(script: impl IntoIterator<Item = Handshake>) -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(Vec::new()),
            script: Mutex::new(script.into_iter().collect()),
        })
    }

    pub fn links(&self) -> Vec<Arc<MockLinkShared>> {
        self.links.lock().clone()
    }

    pub fn created(&self) -> usize {
        self.links.lock().len()
    }

    pub fn link(&self, index: usize) -> Arc<MockLinkShared> {
        self.links.lock()[index].clone()
    }

    /// The most recent link opened for `call_id`.
    pub fn link_for(&self, call_id: &str) -> Option<Arc<MockLinkShared>> {
        self.links
            .lock()
            .iter()
            .rev()
            .find(|l| l.call_id().as_deref() == Some(call_id))
            .cloned()
    }
}

impl LinkFactory for MockLinkFactory {
    fn create(&self) -> Result<Box<dyn TranscriptionLink>, STTError> {
        let handshake = self.script.lock().pop_front().unwrap_or(Handshake::Succeed);
        let mut links = self.links.lock();
        let shared = Arc::new(MockLinkShared {
            index: links.len(),
            ..Default::default()
        });
        links.push(shared.clone());
        Ok(Box::new(MockLink {
            shared,
            handshake,
            closed: false,
        }))
    }
}

// =============================================================================
// Synthesis
// =============================================================================

/// Returns `MOCK:<text>` as MP3 bytes.
pub struct MockSynthesizer {
    calls: AtomicUsize,
    fail_first: usize,
    delay: Duration,
    /// Only the first `delay_first` requests are delayed.
    delay_first: usize,
}

impl MockSynthesizer {
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// Fail the first `n` requests.
    pub fn failing(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: n,
            delay: Duration::ZERO,
            delay_first: 0,
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::slow_first(usize::MAX, delay)
    }

    /// Delay the first `n` requests, answer the rest immediately.
    pub fn slow_first(n: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            delay,
            delay_first: n,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> TTSResult<SynthesizedAudio> {
        let n = self.calls.fetch_add(1, Ordering::AcqRel);
        if n < self.delay_first && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.fail_first {
            return Err(TTSError::ProviderError("mock synthesis failure".to_string()));
        }
        Ok(SynthesizedAudio {
            data: Bytes::from(format!("MOCK:{text}")),
            content_type: "audio/mpeg",
            extension: "mp3",
        })
    }

    fn voice(&self) -> &str {
        "mock-voice"
    }

    fn provider_info(&self) -> &'static str {
        "mock"
    }
}

// =============================================================================
// Call control
// =============================================================================

/// Records every directive; tracks how many dispatches overlap.
#[derive(Default)]
pub struct RecordingControl {
    directives: Mutex<Vec<ReplyDirective>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub fn directives(&self) -> Vec<ReplyDirective> {
        self.directives.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.directives.lock().len()
    }

    pub fn for_call(&self, call_id: &str) -> Vec<ReplyDirective> {
        self.directives
            .lock()
            .iter()
            .filter(|d| d.call_id == call_id)
            .cloned()
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CallControl for RecordingControl {
    async fn dispatch(&self, directive: &ReplyDirective) -> Result<(), ControlError> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.directives.lock().push(directive.clone());
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::RestUpdate
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// Default keyword rules, in-memory audio store.
pub fn pipeline(
    synthesizer: Arc<MockSynthesizer>,
    control: Arc<RecordingControl>,
) -> Arc<ReplyPipeline> {
    let store = Arc::new(ObjectAudioStore::in_memory(AUDIO_BASE_URL));
    pipeline_with_store(synthesizer, control, store)
}

pub fn pipeline_with_store(
    synthesizer: Arc<MockSynthesizer>,
    control: Arc<dyn CallControl>,
    store: Arc<ObjectAudioStore>,
) -> Arc<ReplyPipeline> {
    build_pipeline(synthesizer, control, store, Duration::from_secs(2))
}

/// Like [`pipeline`], with a custom bound on each turn.
pub fn pipeline_with_timeout(
    synthesizer: Arc<MockSynthesizer>,
    control: Arc<RecordingControl>,
    limit: Duration,
) -> Arc<ReplyPipeline> {
    let store = Arc::new(ObjectAudioStore::in_memory(AUDIO_BASE_URL));
    build_pipeline(synthesizer, control, store, limit)
}

fn build_pipeline(
    synthesizer: Arc<MockSynthesizer>,
    control: Arc<dyn CallControl>,
    store: Arc<ObjectAudioStore>,
    limit: Duration,
) -> Arc<ReplyPipeline> {
    let decision = KeywordDecision::new(&default_rules(), DEFAULT_FALLBACK_REPLY)
        .expect("default rules compile");
    Arc::new(
        ReplyPipeline::new(Arc::new(decision), synthesizer, store, control).with_timeout(limit),
    )
}

pub fn context(
    factory: Arc<MockLinkFactory>,
    pipeline: Arc<ReplyPipeline>,
    settings: SessionSettings,
) -> SessionContext {
    SessionContext {
        registry: Arc::new(SessionRegistry::new()),
        link_factory: factory,
        pipeline,
        settings,
    }
}

// =============================================================================
// Media-stream frames
// =============================================================================

pub fn start_frame(call_sid: &str) -> String {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "streamSid": format!("MZ{call_sid}"),
        "start": {
            "streamSid": format!("MZ{call_sid}"),
            "callSid": call_sid,
            "accountSid": "AC00000000000000000000000000000000",
            "tracks": ["inbound"],
            "mediaFormat": {
                "encoding": "audio/x-mulaw",
                "sampleRate": 8000,
                "channels": 1
            },
            "customParameters": { "callId": call_sid }
        }
    })
    .to_string()
}

pub fn media_frame(call_sid: &str, audio: &[u8]) -> String {
    json!({
        "event": "media",
        "streamSid": format!("MZ{call_sid}"),
        "media": {
            "track": "inbound",
            "chunk": "1",
            "timestamp": "20",
            "payload": STANDARD.encode(audio)
        }
    })
    .to_string()
}

pub fn stop_frame(call_sid: &str) -> String {
    json!({
        "event": "stop",
        "streamSid": format!("MZ{call_sid}"),
        "stop": { "callSid": call_sid }
    })
    .to_string()
}

// =============================================================================
// Waiting
// =============================================================================

/// Poll `check` until it holds or `limit` passes.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Give the session task time to drain its inbox.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
