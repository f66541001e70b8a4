mod base;
pub mod deepgram;

pub use base::{
    LinkErrorCallback, LinkFactory, LinkHandshake, STTConfig, STTError, TranscriptCallback,
    TranscriptEvent, TranscriptionLink,
};

pub use deepgram::{DeepgramLink, DeepgramLinkConfig, DeepgramLinkFactory};
