//! Call Session Tests
//!
//! Drives real `CallSession` tasks with mock transcription links, a mock
//! synthesizer and a recording control plane. Media frames go in through a
//! channel standing in for the WebSocket; transcripts are injected through
//! the callbacks the session registers on its link.

mod mock_providers;

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use tokio::task::JoinHandle;

use callbridge::session::{SessionError, SessionSettings, SessionState, TurnPolicy, TurnSettings};
use callbridge::{CallSession, STTError, SessionContext, SessionSummary, TranscriptEvent};

use mock_providers::{
    AUDIO_BASE_URL, Handshake, MockLinkFactory, MockSynthesizer, RecordingControl, context,
    eventually, media_frame, pipeline, pipeline_with_timeout, settle, start_frame, stop_frame,
};

const WAIT: Duration = Duration::from_secs(2);

type Inbound = mpsc::UnboundedSender<String>;

fn spawn_session(ctx: SessionContext, call_id: Option<&str>) -> (Inbound, JoinHandle<SessionSummary>) {
    let (tx, rx) = mpsc::unbounded::<String>();
    let session = CallSession::new(ctx, call_id.map(str::to_string));
    (tx, tokio::spawn(session.run(rx)))
}

fn send(tx: &Inbound, frame: String) {
    tx.unbounded_send(frame).expect("session inbound open");
}

/// Start a session for `call_id` and bring it to streaming.
async fn streaming_session(
    ctx: SessionContext,
    factory: &MockLinkFactory,
    call_id: &str,
) -> (Inbound, JoinHandle<SessionSummary>) {
    let (tx, handle) = spawn_session(ctx, Some(call_id));
    assert!(
        eventually(WAIT, || factory
            .link_for(call_id)
            .is_some_and(|l| l.is_ready()))
        .await,
        "link for {call_id} never became ready"
    );
    send(&tx, start_frame(call_id));
    settle().await;
    (tx, handle)
}

fn default_parts() -> (Arc<MockLinkFactory>, Arc<RecordingControl>, SessionContext) {
    let factory = MockLinkFactory::new();
    let control = RecordingControl::new();
    let ctx = context(
        factory.clone(),
        pipeline(MockSynthesizer::new(), control.clone()),
        SessionSettings::default(),
    );
    (factory, control, ctx)
}

// =============================================================================
// Audio forwarding
// =============================================================================

#[tokio::test]
async fn test_media_before_start_is_not_forwarded() {
    let (factory, _control, ctx) = default_parts();
    let (tx, handle) = spawn_session(ctx, Some("CA100"));

    assert!(eventually(WAIT, || factory.created() == 1 && factory.link(0).is_ready()).await);
    settle().await;

    send(&tx, media_frame("CA100", &[0x01; 160]));
    send(&tx, media_frame("CA100", &[0x02; 160]));
    settle().await;
    assert_eq!(factory.link(0).chunks(), 0);

    send(&tx, start_frame("CA100"));
    settle().await;
    send(&tx, media_frame("CA100", &[0x03; 160]));
    send(&tx, stop_frame("CA100"));

    let summary = handle.await.unwrap();
    assert_eq!(summary.frames_dropped, 2);
    assert_eq!(summary.frames_forwarded, 1);
    assert_eq!(factory.link(0).audio_bytes(), vec![0x03; 160]);
    assert_eq!(summary.final_state, SessionState::Closed);
    assert!(summary.error.is_none());
}

#[tokio::test]
async fn test_malformed_frames_are_counted_and_skipped() {
    let (factory, _control, ctx) = default_parts();
    let (tx, handle) = streaming_session(ctx, &factory, "CA101").await;

    send(&tx, "not json".to_string());
    send(
        &tx,
        r#"{"event":"media","media":{"payload":"%%%not-base64%%%"}}"#.to_string(),
    );
    send(&tx, r#"{"event":"mark","mark":{"name":"m1"}}"#.to_string());
    // Empty audio must never reach the link.
    send(&tx, media_frame("CA101", &[]));
    send(&tx, media_frame("CA101", &[0x7F; 80]));
    send(&tx, stop_frame("CA101"));

    let summary = handle.await.unwrap();
    assert_eq!(summary.frames_malformed, 3);
    assert_eq!(summary.frames_forwarded, 1);
    assert_eq!(factory.link(0).chunks(), 1);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_stop_closes_link_once_and_unregisters() {
    let (factory, _control, ctx) = default_parts();
    let registry = ctx.registry.clone();
    let (tx, handle) = streaming_session(ctx, &factory, "CA102").await;
    assert!(registry.contains("CA102"));

    send(&tx, stop_frame("CA102"));
    let summary = handle.await.unwrap();

    assert_eq!(summary.call_id.as_deref(), Some("CA102"));
    assert_eq!(factory.link(0).close_calls(), 1);
    assert!(!registry.contains("CA102"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_inbound_close_ends_session() {
    let (factory, _control, ctx) = default_parts();
    let (tx, handle) = streaming_session(ctx, &factory, "CA103").await;

    drop(tx);
    let summary = handle.await.unwrap();
    assert_eq!(summary.final_state, SessionState::Closed);
    assert_eq!(factory.link(0).close_calls(), 1);
}

#[tokio::test]
async fn test_call_id_taken_from_start_event() {
    let (factory, control, ctx) = default_parts();
    let registry = ctx.registry.clone();
    let (tx, handle) = spawn_session(ctx, None);

    assert!(eventually(WAIT, || factory.created() == 1 && factory.link(0).is_ready()).await);
    assert!(registry.is_empty());

    send(&tx, start_frame("CA104"));
    assert!(eventually(WAIT, || registry.contains("CA104")).await);

    factory
        .link(0)
        .emit(TranscriptEvent::final_segment("I slipped on the stairs"))
        .await;
    assert!(eventually(WAIT, || control.count() == 1).await);
    assert_eq!(control.directives()[0].call_id, "CA104");

    drop(tx);
    let summary = handle.await.unwrap();
    assert_eq!(summary.call_id.as_deref(), Some("CA104"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_idle_inbound_times_out() {
    let factory = MockLinkFactory::new();
    let settings = SessionSettings {
        inbound_idle_timeout: Duration::from_millis(100),
        ..SessionSettings::default()
    };
    let ctx = context(
        factory.clone(),
        pipeline(MockSynthesizer::new(), RecordingControl::new()),
        settings,
    );
    let (_tx, handle) = spawn_session(ctx, Some("CA105"));

    let summary = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(summary.error, Some(SessionError::IdleTimeout(_))));
    assert_eq!(factory.link(0).close_calls(), 1);
}

#[tokio::test]
async fn test_newer_session_supersedes_older() {
    let (factory, _control, ctx) = default_parts();
    let registry = ctx.registry.clone();

    let (_old_tx, old) = spawn_session(ctx.clone(), Some("CA106"));
    assert!(eventually(WAIT, || registry.contains("CA106")).await);
    let first_generation = registry.get("CA106").unwrap().generation;

    let (new_tx, new) = spawn_session(ctx, Some("CA106"));
    let summary = tokio::time::timeout(WAIT, old).await.unwrap().unwrap();
    assert_eq!(summary.error, Some(SessionError::Superseded));

    // The older session's teardown leaves the newer registration alone.
    let entry = registry.get("CA106").expect("newer session still registered");
    assert!(entry.generation > first_generation);

    drop(new_tx);
    new.await.unwrap();
    assert!(registry.is_empty());
    assert_eq!(factory.created(), 2);
}

// =============================================================================
// Turns and replies
// =============================================================================

#[tokio::test]
async fn test_fragmented_utterance_yields_one_reply() {
    let (factory, control, ctx) = default_parts();
    let (tx, handle) = streaming_session(ctx, &factory, "CA200").await;
    let link = factory.link(0);

    link.emit(TranscriptEvent::interim("")).await;
    link.emit(TranscriptEvent::interim("I was in an")).await;
    link.emit(TranscriptEvent::final_segment("I was in an accident")).await;

    assert!(eventually(WAIT, || control.count() == 1).await);
    settle().await;

    let directives = control.directives();
    assert_eq!(directives.len(), 1);
    let reply = &directives[0];
    assert_eq!(reply.call_id, "CA200");
    assert_eq!(reply.turn, 1);
    assert_eq!(reply.utterance, "I was in an accident");
    assert_eq!(reply.reply_text, "Were you injured?");
    assert!(reply.audio_url.starts_with(&format!("{AUDIO_BASE_URL}/audio/")));
    assert!(reply.audio_url.ends_with(".mp3"));

    send(&tx, stop_frame("CA200"));
    let summary = handle.await.unwrap();
    assert_eq!(summary.turns_started, 1);
    assert_eq!(summary.turns_completed, 1);
    assert_eq!(summary.turns_failed, 0);
}

#[tokio::test]
async fn test_only_one_reply_pipeline_in_flight() {
    let factory = MockLinkFactory::new();
    let control = RecordingControl::slow(Duration::from_millis(200));
    let ctx = context(
        factory.clone(),
        pipeline(MockSynthesizer::new(), control.clone()),
        SessionSettings::default(),
    );
    let (tx, handle) = streaming_session(ctx, &factory, "CA201").await;
    let link = factory.link(0);

    link.emit(TranscriptEvent::final_segment("first thing")).await;
    link.emit(TranscriptEvent::final_segment("second thing")).await;
    link.emit(TranscriptEvent::final_segment("third thing")).await;

    assert!(eventually(WAIT, || control.count() == 2).await);
    settle().await;

    let directives = control.directives();
    assert_eq!(directives.len(), 2);
    assert_eq!(control.max_in_flight(), 1);
    assert_eq!(directives[0].utterance, "first thing");
    assert_eq!(directives[1].utterance, "second thing third thing");
    assert_eq!(directives[1].turn, 2);

    send(&tx, stop_frame("CA201"));
    let summary = handle.await.unwrap();
    assert_eq!(summary.turns_started, 2);
    assert_eq!(summary.turns_completed, 2);
}

#[tokio::test]
async fn test_synthesis_failure_releases_turn() {
    let factory = MockLinkFactory::new();
    let control = RecordingControl::new();
    let synthesizer = MockSynthesizer::failing(1);
    let ctx = context(
        factory.clone(),
        pipeline(synthesizer.clone(), control.clone()),
        SessionSettings::default(),
    );
    let (tx, handle) = streaming_session(ctx, &factory, "CA202").await;
    let link = factory.link(0);

    link.emit(TranscriptEvent::final_segment("I was in an accident")).await;
    assert!(eventually(WAIT, || synthesizer.calls() == 1).await);
    settle().await;
    assert_eq!(control.count(), 0);

    link.emit(TranscriptEvent::final_segment("yes I was hurt")).await;
    assert!(eventually(WAIT, || control.count() == 1).await);
    assert_eq!(control.directives()[0].utterance, "yes I was hurt");

    send(&tx, stop_frame("CA202"));
    let summary = handle.await.unwrap();
    assert_eq!(summary.turns_started, 2);
    assert_eq!(summary.turns_failed, 1);
    assert_eq!(summary.turns_completed, 1);
}

#[tokio::test]
async fn test_pipeline_timeout_fails_only_that_turn() {
    let factory = MockLinkFactory::new();
    let control = RecordingControl::new();
    let synthesizer = MockSynthesizer::slow_first(1, Duration::from_millis(500));
    let ctx = context(
        factory.clone(),
        pipeline_with_timeout(synthesizer.clone(), control.clone(), Duration::from_millis(100)),
        SessionSettings::default(),
    );
    let (tx, handle) = streaming_session(ctx, &factory, "CA204").await;
    let link = factory.link(0);

    link.emit(TranscriptEvent::final_segment("I was in an accident")).await;
    assert!(eventually(WAIT, || synthesizer.calls() == 1).await);
    // Past the 100 ms bound; the turn has been released.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(control.count(), 0);

    link.emit(TranscriptEvent::final_segment("yes I was hurt")).await;
    assert!(eventually(WAIT, || control.count() == 1).await);
    assert_eq!(control.directives()[0].utterance, "yes I was hurt");
    assert_eq!(control.directives()[0].turn, 2);

    // The timed-out turn never dispatches late.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(control.count(), 1);

    send(&tx, stop_frame("CA204"));
    let summary = handle.await.unwrap();
    assert_eq!(summary.turns_started, 2);
    assert_eq!(summary.turns_failed, 1);
    assert_eq!(summary.turns_completed, 1);
    assert!(summary.error.is_none());
}

#[tokio::test]
async fn test_silence_window_completes_turn() {
    let factory = MockLinkFactory::new();
    let control = RecordingControl::new();
    let settings = SessionSettings {
        turn: TurnSettings {
            policy: TurnPolicy::Silence,
            silence_window: Duration::from_millis(400),
            ..TurnSettings::default()
        },
        ..SessionSettings::default()
    };
    let ctx = context(
        factory.clone(),
        pipeline(MockSynthesizer::new(), control.clone()),
        settings,
    );
    let (tx, handle) = streaming_session(ctx, &factory, "CA205").await;
    let link = factory.link(0);

    link.emit(TranscriptEvent::interim("I was in an")).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    link.emit(TranscriptEvent::interim("I was in an accident")).await;

    // Each fragment restarts the window.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(control.count(), 0);

    assert!(eventually(WAIT, || control.count() == 1).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(control.count(), 1);

    let reply = &control.directives()[0];
    assert_eq!(reply.utterance, "I was in an accident");
    assert_eq!(reply.reply_text, "Were you injured?");

    send(&tx, stop_frame("CA205"));
    let summary = handle.await.unwrap();
    assert_eq!(summary.turns_started, 1);
    assert_eq!(summary.turns_completed, 1);
}

#[tokio::test]
async fn test_reply_abandoned_when_call_ends() {
    let factory = MockLinkFactory::new();
    let control = RecordingControl::new();
    let ctx = context(
        factory.clone(),
        pipeline(MockSynthesizer::slow(Duration::from_millis(300)), control.clone()),
        SessionSettings::default(),
    );
    let (tx, handle) = streaming_session(ctx, &factory, "CA203").await;

    factory
        .link(0)
        .emit(TranscriptEvent::final_segment("I was in an accident"))
        .await;
    settle().await;
    send(&tx, stop_frame("CA203"));

    let summary = handle.await.unwrap();
    assert_eq!(summary.turns_started, 1);
    assert_eq!(summary.turns_completed, 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(control.count(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_stay_isolated() {
    let (factory, control, ctx) = default_parts();
    let (tx_a, a) = streaming_session(ctx.clone(), &factory, "CA300").await;
    let (tx_b, b) = streaming_session(ctx, &factory, "CA301").await;

    let link_a = factory.link_for("CA300").unwrap();
    let link_b = factory.link_for("CA301").unwrap();
    assert_ne!(link_a.index, link_b.index);

    send(&tx_a, media_frame("CA300", &[0xAA; 160]));
    send(&tx_b, media_frame("CA301", &[0xBB; 160]));
    link_a.emit(TranscriptEvent::final_segment("I was in an accident")).await;
    link_b.emit(TranscriptEvent::final_segment("I'm in a lot of pain")).await;

    assert!(eventually(WAIT, || control.count() == 2).await);

    let replies_a = control.for_call("CA300");
    let replies_b = control.for_call("CA301");
    assert_eq!(replies_a.len(), 1);
    assert_eq!(replies_b.len(), 1);
    assert_eq!(replies_a[0].utterance, "I was in an accident");
    assert_eq!(replies_a[0].reply_text, "Were you injured?");
    assert_eq!(replies_b[0].utterance, "I'm in a lot of pain");
    assert_eq!(
        replies_b[0].reply_text,
        "I'm sorry to hear that. Did you receive medical treatment?"
    );

    drop(tx_a);
    drop(tx_b);
    a.await.unwrap();
    b.await.unwrap();
    assert_eq!(link_a.audio_bytes(), vec![0xAA; 160]);
    assert_eq!(link_b.audio_bytes(), vec![0xBB; 160]);
}

// =============================================================================
// Transcription link failures
// =============================================================================

#[tokio::test]
async fn test_link_retried_then_unavailable() {
    let factory = MockLinkFactory::scripted([
        Handshake::Fail(STTError::ConnectionFailed("refused".to_string())),
        Handshake::Fail(STTError::ConnectionFailed("refused again".to_string())),
    ]);
    let ctx = context(
        factory.clone(),
        pipeline(MockSynthesizer::new(), RecordingControl::new()),
        SessionSettings::default(),
    );
    let registry = ctx.registry.clone();
    let (_tx, handle) = spawn_session(ctx, Some("CA400"));

    let summary = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    match summary.error {
        Some(SessionError::LinkUnavailable { attempts, source }) => {
            assert_eq!(attempts, 2);
            assert_eq!(source, STTError::ConnectionFailed("refused again".to_string()));
        }
        other => panic!("expected LinkUnavailable, got {other:?}"),
    }
    assert_eq!(summary.link_attempts, 2);
    assert_eq!(factory.created(), 2);
    for link in factory.links() {
        assert_eq!(link.close_calls(), 1);
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_link_recovers_after_failed_handshake() {
    let factory = MockLinkFactory::scripted([Handshake::Fail(STTError::ConnectionFailed(
        "refused".to_string(),
    ))]);
    let ctx = context(
        factory.clone(),
        pipeline(MockSynthesizer::new(), RecordingControl::new()),
        SessionSettings::default(),
    );
    let (tx, handle) = spawn_session(ctx, Some("CA401"));

    assert!(eventually(WAIT, || factory.created() == 2 && factory.link(1).is_ready()).await);
    send(&tx, start_frame("CA401"));
    settle().await;
    send(&tx, media_frame("CA401", &[0x10; 160]));
    send(&tx, stop_frame("CA401"));

    let summary = handle.await.unwrap();
    assert!(summary.error.is_none());
    assert_eq!(summary.link_attempts, 2);
    assert_eq!(factory.link(0).chunks(), 0);
    assert_eq!(factory.link(1).chunks(), 1);
}

#[tokio::test]
async fn test_handshake_timeout_counts_as_failure() {
    let factory = MockLinkFactory::scripted([Handshake::Hang, Handshake::Hang]);
    let settings = SessionSettings {
        handshake_timeout: Duration::from_millis(100),
        ..SessionSettings::default()
    };
    let ctx = context(
        factory.clone(),
        pipeline(MockSynthesizer::new(), RecordingControl::new()),
        settings,
    );
    let (_tx, handle) = spawn_session(ctx, Some("CA402"));

    let summary = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(
        summary.error,
        Some(SessionError::LinkUnavailable {
            source: STTError::HandshakeTimeout(100),
            ..
        })
    ));
}

#[tokio::test]
async fn test_mid_call_link_failure_reconnects() {
    let (factory, control, ctx) = default_parts();
    let (tx, handle) = streaming_session(ctx, &factory, "CA403").await;

    factory
        .link(0)
        .fail(STTError::NetworkError("connection reset".to_string()))
        .await;
    assert!(eventually(WAIT, || factory.created() == 2 && factory.link(1).is_ready()).await);
    settle().await;

    send(&tx, media_frame("CA403", &[0x20; 160]));
    settle().await;
    assert_eq!(factory.link(1).chunks(), 1);
    assert_eq!(factory.link(0).close_calls(), 1);

    factory
        .link(1)
        .emit(TranscriptEvent::final_segment("I was in an accident"))
        .await;
    assert!(eventually(WAIT, || control.count() == 1).await);

    send(&tx, stop_frame("CA403"));
    let summary = handle.await.unwrap();
    assert!(summary.error.is_none());
    assert_eq!(factory.link(1).close_calls(), 1);
}
