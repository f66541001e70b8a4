//! Media-stream frame codec.
//!
//! Decodes the JSON text frames a telephony platform sends over its media
//! stream into [`StreamFrame`] values and base64-decodes `media` payloads into
//! raw audio bytes ready to forward to a transcription link. Decoding never
//! fails loudly: anything the codec cannot make sense of becomes
//! [`StreamFrame::Malformed`] so the session can drop it and keep going.
//!
//! The encode direction builds the outbound `media`, `clear` and `mark`
//! frames of the bidirectional transport.

mod messages;

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;

pub use messages::MediaFormat;
use messages::{
    EventEnvelope, MarkPayload, MediaEnvelope, OutboundClear, OutboundMark, OutboundMedia,
    OutboundMediaPayload, StartEnvelope, StopEnvelope,
};

/// Metadata carried by the `start` event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamStart {
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub account_sid: Option<String>,
    pub tracks: Vec<String>,
    pub media_format: MediaFormat,
    pub custom_parameters: HashMap<String, String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Start(StreamStart),
    Media(Bytes),
    Stop { call_sid: Option<String> },
    /// Well-formed frame of a kind the bridge does not act on (`connected`, `mark`, ...).
    Other(String),
    /// Undecodable frame with a short reason, for logging.
    Malformed(String),
}

impl StreamFrame {
    pub fn kind(&self) -> &str {
        match self {
            StreamFrame::Start(_) => "start",
            StreamFrame::Media(_) => "media",
            StreamFrame::Stop { .. } => "stop",
            StreamFrame::Other(kind) => kind,
            StreamFrame::Malformed(_) => "malformed",
        }
    }
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> StreamFrame {
    let envelope: EventEnvelope<'_> = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => return StreamFrame::Malformed(format!("invalid JSON: {e}")),
    };

    match envelope.event {
        Some("media") => decode_media(text),
        Some("start") => decode_start(text),
        Some("stop") => match serde_json::from_str::<StopEnvelope>(text) {
            Ok(stop) => StreamFrame::Stop {
                call_sid: stop.stop.and_then(|s| s.call_sid),
            },
            Err(e) => StreamFrame::Malformed(format!("invalid stop event: {e}")),
        },
        Some(other) => StreamFrame::Other(other.to_string()),
        None => StreamFrame::Malformed("missing event field".to_string()),
    }
}

fn decode_media(text: &str) -> StreamFrame {
    let envelope: MediaEnvelope<'_> = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => return StreamFrame::Malformed(format!("invalid media event: {e}")),
    };

    // Outbound-track echoes are not caller audio.
    if envelope.media.track.is_some_and(|t| t == "outbound") {
        return StreamFrame::Other("media:outbound".to_string());
    }

    match decode_payload(&envelope.media.payload) {
        // A zero-length binary message ends a Deepgram stream.
        Some(audio) if audio.is_empty() => StreamFrame::Malformed(format!(
            "empty media payload (chunk {})",
            envelope.media.chunk.unwrap_or("?")
        )),
        Some(audio) => StreamFrame::Media(audio),
        None => StreamFrame::Malformed(format!(
            "undecodable media payload (chunk {})",
            envelope.media.chunk.unwrap_or("?")
        )),
    }
}

fn decode_start(text: &str) -> StreamFrame {
    let envelope: StartEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => return StreamFrame::Malformed(format!("invalid start event: {e}")),
    };

    let start = envelope.start;
    StreamFrame::Start(StreamStart {
        stream_sid: start.stream_sid.or(envelope.stream_sid),
        call_sid: start.call_sid.filter(|sid| !sid.is_empty()),
        account_sid: start.account_sid,
        tracks: start.tracks,
        media_format: start.media_format.unwrap_or_default(),
        custom_parameters: start.custom_parameters,
    })
}

/// Base64-decode a media payload. Returns `None` on invalid input.
#[inline]
pub fn decode_payload(payload: &str) -> Option<Bytes> {
    BASE64.decode(payload.trim()).ok().map(Bytes::from)
}

/// Build an outbound `media` frame carrying `audio` for `stream_sid`.
pub fn encode_media(stream_sid: &str, audio: &[u8]) -> String {
    let frame = OutboundMedia {
        event: "media",
        stream_sid,
        media: OutboundMediaPayload {
            payload: BASE64.encode(audio),
        },
    };
    // Serializing plain strings cannot fail.
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Build a `clear` frame that flushes audio queued on the platform side.
pub fn encode_clear(stream_sid: &str) -> String {
    serde_json::to_string(&OutboundClear {
        event: "clear",
        stream_sid,
    })
    .unwrap_or_default()
}

/// Build a `mark` frame; the platform echoes it back once playback reaches it.
pub fn encode_mark(stream_sid: &str, name: &str) -> String {
    serde_json::to_string(&OutboundMark {
        event: "mark",
        stream_sid,
        mark: MarkPayload { name },
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = r#"{
        "event": "start",
        "sequenceNumber": "1",
        "start": {
            "accountSid": "AC123",
            "streamSid": "MZ456",
            "callSid": "CA789",
            "tracks": ["inbound"],
            "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
            "customParameters": {"caller": "+15550001111"}
        },
        "streamSid": "MZ456"
    }"#;

    #[test]
    fn test_decode_start() {
        let StreamFrame::Start(start) = decode_frame(START) else {
            panic!("expected start frame");
        };
        assert_eq!(start.call_sid.as_deref(), Some("CA789"));
        assert_eq!(start.stream_sid.as_deref(), Some("MZ456"));
        assert_eq!(start.media_format.sample_rate, 8000);
        assert_eq!(
            start.custom_parameters.get("caller").map(String::as_str),
            Some("+15550001111")
        );
    }

    #[test]
    fn test_decode_media_payload() {
        let frame = r#"{"event":"media","media":{"track":"inbound","chunk":"2","payload":"AQID"}}"#;
        assert_eq!(
            decode_frame(frame),
            StreamFrame::Media(Bytes::from_static(&[1, 2, 3]))
        );
    }

    #[test]
    fn test_decode_stop() {
        let frame = r#"{"event":"stop","stop":{"accountSid":"AC1","callSid":"CA1"}}"#;
        assert_eq!(
            decode_frame(frame),
            StreamFrame::Stop {
                call_sid: Some("CA1".to_string())
            }
        );
        assert_eq!(
            decode_frame(r#"{"event":"stop"}"#),
            StreamFrame::Stop { call_sid: None }
        );
    }

    #[test]
    fn test_other_events() {
        let connected = r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#;
        assert_eq!(
            decode_frame(connected),
            StreamFrame::Other("connected".to_string())
        );
        let mark = r#"{"event":"mark","mark":{"name":"reply-1"}}"#;
        assert_eq!(decode_frame(mark).kind(), "mark");
    }

    #[test]
    fn test_malformed_frames_do_not_panic() {
        for input in [
            "",
            "not json",
            "{}",
            "[1,2,3]",
            r#"{"event":"media"}"#,
            r#"{"event":"media","media":{"payload":"***"}}"#,
            r#"{"event":"media","media":{"payload":""}}"#,
            r#"{"event":"media","media":{"track":"inbound","payload":"  "}}"#,
            r#"{"event":"start","start":42}"#,
        ] {
            assert!(
                matches!(decode_frame(input), StreamFrame::Malformed(_)),
                "input {input:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_outbound_track_is_not_caller_audio() {
        let frame = r#"{"event":"media","media":{"track":"outbound","payload":"AQID"}}"#;
        assert!(matches!(decode_frame(frame), StreamFrame::Other(_)));
    }

    #[test]
    fn test_encode_frames() {
        let media: serde_json::Value =
            serde_json::from_str(&encode_media("MZ1", &[1, 2, 3])).unwrap();
        assert_eq!(media["event"], "media");
        assert_eq!(media["streamSid"], "MZ1");
        assert_eq!(media["media"]["payload"], "AQID");

        let clear: serde_json::Value = serde_json::from_str(&encode_clear("MZ1")).unwrap();
        assert_eq!(clear["event"], "clear");

        let mark: serde_json::Value = serde_json::from_str(&encode_mark("MZ1", "r1")).unwrap();
        assert_eq!(mark["mark"]["name"], "r1");
    }
}
