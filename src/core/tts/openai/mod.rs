//! OpenAI-compatible speech synthesis (`POST /v1/audio/speech`).

mod config;
mod provider;

pub use config::{
    AudioOutputFormat, DEFAULT_OPENAI_BASE_URL, OpenAITTSConfig, OpenAITTSModel, OpenAIVoice,
};
pub use provider::OpenAISynthesizer;
