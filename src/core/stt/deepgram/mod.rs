//! Deepgram live-streaming transcription.
//!
//! - [`config`]: URL and audio parameter negotiation
//! - [`messages`]: engine message types
//! - [`client`]: the [`DeepgramLink`] connection

mod client;
mod config;
mod messages;


pub use client::{
    AUDIO_CHANNEL_CAPACITY, DeepgramLink, DeepgramLinkFactory, MAX_AUDIO_CHUNK_SIZE,
};
pub use config::{DEFAULT_DEEPGRAM_URL, DeepgramEncoding, DeepgramLinkConfig};
pub use messages::{ControlMessage, DeepgramMessage, ResultsMessage};
