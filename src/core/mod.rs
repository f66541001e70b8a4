pub mod codec;
pub mod control;
pub mod decision;
pub mod pipeline;
pub mod storage;
pub mod stt;
pub mod tts;

// Re-export commonly used types for convenience
pub use codec::{StreamFrame, StreamStart, decode_frame};

pub use stt::{
    DeepgramLink, DeepgramLinkConfig, DeepgramLinkFactory, LinkFactory, STTConfig, STTError,
    TranscriptEvent, TranscriptionLink,
};

pub use tts::{OpenAISynthesizer, SynthesizedAudio, Synthesizer, TTSError, TTSResult};

pub use control::{CallControl, ControlError, DispatchMode, IntegrationMode, TwimlResponse};
pub use decision::{Decision, DecisionError, KeywordDecision};
pub use pipeline::{PipelineError, ReplyDirective, ReplyPipeline};
pub use storage::{AudioStore, ObjectAudioStore, StorageError};
