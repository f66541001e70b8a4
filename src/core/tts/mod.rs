mod base;
pub mod openai;

pub use base::{SynthesizedAudio, Synthesizer, TTSError, TTSResult, UnconfiguredSynthesizer};
pub use openai::{OpenAISynthesizer, OpenAITTSConfig};
