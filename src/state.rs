//! Shared application state handed to every handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::control::{
    CallControl, DirectiveBoard, DispatchMode, Rearm, RedirectControl, RestUpdateControl,
    TelephonyClient, UnconfiguredControl,
};
use crate::core::decision::KeywordDecision;
use crate::core::pipeline::ReplyPipeline;
use crate::core::storage::{AudioStore, ObjectAudioStore};
use crate::core::stt::{DeepgramLinkFactory, LinkFactory};
use crate::core::tts::{OpenAISynthesizer, Synthesizer, UnconfiguredSynthesizer};
use crate::errors::app_error::AppError;
use crate::session::{SessionContext, SessionRegistry};

/// Returned when the configured call capacity is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityReached {
    pub limit: usize,
}

/// One occupied call slot; released on drop.
#[derive(Debug)]
pub struct CallSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for CallSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    pub pipeline: Arc<ReplyPipeline>,
    pub link_factory: Arc<dyn LinkFactory>,
    pub audio_store: Arc<dyn AudioStore>,
    pub directive_board: Arc<DirectiveBoard>,
    /// How replies re-arm listening for the configured integration mode.
    pub rearm: Rearm,
    active_calls: Arc<AtomicUsize>,
}

impl AppState {
    /// Build the production collaborators from configuration.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>, AppError> {
        let audio_store = build_audio_store(&config)?;
        let directive_board = Arc::new(DirectiveBoard::new());
        let rearm = config.rearm();

        let decision = KeywordDecision::new(
            &config.decision_rules,
            config.decision_fallback_reply.clone(),
        )
        .map_err(|e| AppError::Config(e.to_string()))?;
        info!(rules = decision.rule_count(), "Keyword decision rules loaded");

        let tts_config = config
            .tts_config()
            .map_err(|e| AppError::Config(e.to_string()))?;
        let synthesizer: Arc<dyn Synthesizer> = if tts_config.api_key.is_empty() {
            warn!("OPENAI_API_KEY not configured; reply synthesis will fail");
            Arc::new(UnconfiguredSynthesizer)
        } else {
            Arc::new(
                OpenAISynthesizer::new(tts_config).map_err(|e| AppError::Config(e.to_string()))?,
            )
        };

        let control = build_call_control(&config, rearm.clone(), directive_board.clone())?;

        let pipeline = ReplyPipeline::new(
            Arc::new(decision),
            synthesizer,
            audio_store.clone(),
            control,
        )
        .with_timeout(config.pipeline_timeout());

        let link_config = config
            .deepgram_link_config()
            .map_err(|e| AppError::Config(e.to_string()))?;
        let link_factory: Arc<dyn LinkFactory> = Arc::new(DeepgramLinkFactory::new(link_config));

        Ok(Self::with_parts(
            config,
            link_factory,
            Arc::new(pipeline),
            audio_store,
            directive_board,
        ))
    }

    /// Assemble state from explicit collaborators.
    pub fn with_parts(
        config: ServerConfig,
        link_factory: Arc<dyn LinkFactory>,
        pipeline: Arc<ReplyPipeline>,
        audio_store: Arc<dyn AudioStore>,
        directive_board: Arc<DirectiveBoard>,
    ) -> Arc<Self> {
        let rearm = config.rearm();
        Arc::new(Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            pipeline,
            link_factory,
            audio_store,
            directive_board,
            rearm,
            active_calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            link_factory: self.link_factory.clone(),
            pipeline: self.pipeline.clone(),
            settings: self.config.session_settings(),
        }
    }

    /// Reserve a slot for a new media stream.
    pub fn try_acquire_call(&self) -> Result<CallSlot, CapacityReached> {
        match self.config.max_concurrent_calls {
            Some(limit) => {
                self.active_calls
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < limit).then_some(n + 1)
                    })
                    .map_err(|_| CapacityReached { limit })?;
            }
            None => {
                self.active_calls.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(CallSlot {
            active: self.active_calls.clone(),
        })
    }

    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::Acquire)
    }
}

fn build_audio_store(config: &ServerConfig) -> Result<Arc<dyn AudioStore>, AppError> {
    let base = config.audio_public_base().to_string();
    let prefix = config.audio_storage_prefix.clone();

    let store = if let Some(bucket) = &config.audio_s3_bucket {
        ObjectAudioStore::s3(bucket, prefix, base)?
    } else if let Some(path) = &config.audio_storage_path {
        ObjectAudioStore::local(path, prefix, base)?
    } else {
        info!("No audio storage configured; keeping reply audio in memory");
        ObjectAudioStore::in_memory(base)
    };
    Ok(Arc::new(store))
}

fn build_call_control(
    config: &ServerConfig,
    rearm: Rearm,
    board: Arc<DirectiveBoard>,
) -> Result<Arc<dyn CallControl>, AppError> {
    let (Some(sid), Some(token)) = (
        config.telephony_account_sid.as_deref(),
        config.telephony_auth_token.as_deref(),
    ) else {
        warn!("Telephony credentials missing; replies on media streams will not be dispatched");
        return Ok(Arc::new(UnconfiguredControl));
    };

    let client = TelephonyClient::new(config.telephony_api_base_url.clone(), sid, token)
        .map_err(|e| AppError::Config(e.to_string()))?;

    let control: Arc<dyn CallControl> = match config.dispatch_mode {
        DispatchMode::RestUpdate => Arc::new(RestUpdateControl::new(client, rearm)),
        DispatchMode::Redirect => Arc::new(RedirectControl::new(
            client,
            config.public_url.clone(),
            rearm,
            board,
        )),
    };
    info!(mode = %config.dispatch_mode, "Call control configured");
    Ok(control)
}
