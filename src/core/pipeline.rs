//! Reply pipeline: decision, synthesis, storage, then one control action.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::control::{CallControl, ControlError};
use crate::core::decision::{Decision, DecisionError};
use crate::core::storage::{AudioStore, StorageError};
use crate::core::tts::{Synthesizer, TTSError};

/// A reply for one turn, ready for the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyDirective {
    pub call_id: String,
    pub turn: u64,
    pub utterance: String,
    pub reply_text: String,
    pub audio_url: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Decision failed: {0}")]
    Decision(#[from] DecisionError),
    #[error("Synthesis failed: {0}")]
    Synthesis(#[from] TTSError),
    #[error("Audio storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] ControlError),
    #[error("Reply pipeline timed out after {0:?}")]
    Timeout(Duration),
    #[error("Call ended before the reply was dispatched")]
    Cancelled,
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Decision(_) => "decision",
            PipelineError::Synthesis(_) => "synthesis",
            PipelineError::Storage(_) => "storage",
            PipelineError::Dispatch(_) => "dispatch",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

pub const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_secs(15);

const AUDIO_URL_CACHE_CAPACITY: u64 = 1024;
const AUDIO_URL_CACHE_TTL: Duration = Duration::from_secs(3600);

pub struct ReplyPipeline {
    decision: Arc<dyn Decision>,
    synthesizer: Arc<dyn Synthesizer>,
    store: Arc<dyn AudioStore>,
    control: Arc<dyn CallControl>,
    timeout: Duration,
    /// audio key -> public URL of already-stored audio
    audio_urls: Cache<String, String>,
}

impl ReplyPipeline {
    pub fn new(
        decision: Arc<dyn Decision>,
        synthesizer: Arc<dyn Synthesizer>,
        store: Arc<dyn AudioStore>,
        control: Arc<dyn CallControl>,
    ) -> Self {
        Self {
            decision,
            synthesizer,
            store,
            control,
            timeout: DEFAULT_PIPELINE_TIMEOUT,
            audio_urls: Cache::builder()
                .max_capacity(AUDIO_URL_CACHE_CAPACITY)
                .time_to_live(AUDIO_URL_CACHE_TTL)
                .build(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn control(&self) -> &Arc<dyn CallControl> {
        &self.control
    }

    /// Decide, synthesize and store; no control action.
    pub async fn prepare(
        &self,
        call_id: &str,
        turn: u64,
        utterance: &str,
    ) -> Result<ReplyDirective, PipelineError> {
        let reply_text = self.decision.decide(utterance).await?;
        debug!(call_id, turn, reply = %reply_text, "Reply decided");

        let audio_url = self.audio_url_for(&reply_text).await?;

        Ok(ReplyDirective {
            call_id: call_id.to_string(),
            turn,
            utterance: utterance.to_string(),
            reply_text,
            audio_url,
        })
    }

    /// Run the full pipeline for one turn, bounded by the pipeline timeout.
    ///
    /// Nothing is dispatched once `live` is cancelled.
    pub async fn respond(
        &self,
        call_id: &str,
        turn: u64,
        utterance: &str,
        live: &CancellationToken,
    ) -> Result<ReplyDirective, PipelineError> {
        let work = async {
            let directive = self.prepare(call_id, turn, utterance).await?;
            if live.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.control.dispatch(&directive).await?;
            Ok(directive)
        };

        tokio::select! {
            biased;
            _ = live.cancelled() => Err(PipelineError::Cancelled),
            result = tokio::time::timeout(self.timeout, work) => {
                result.unwrap_or(Err(PipelineError::Timeout(self.timeout)))
            }
        }
    }

    async fn audio_url_for(&self, reply_text: &str) -> Result<String, PipelineError> {
        let key = self.synthesizer.audio_key(reply_text);
        if let Some(url) = self.audio_urls.get(&key).await {
            debug!(key = %key, "Reusing stored reply audio");
            return Ok(url);
        }

        let audio = self.synthesizer.synthesize(reply_text).await?;
        let object_key = format!("{key}.{}", audio.extension);
        let url = self.store.put(&object_key, &audio).await?;
        info!(
            key = %object_key,
            bytes = audio.len(),
            provider = self.synthesizer.provider_info(),
            "Stored synthesized reply"
        );

        self.audio_urls.insert(key, url.clone()).await;
        Ok(url)
    }
}
