//! Configuration module for the callbridge server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use callbridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use crate::core::control::{DEFAULT_TELEPHONY_API_BASE, DispatchMode, IntegrationMode, Rearm};
use crate::core::decision::{DEFAULT_FALLBACK_REPLY, DecisionRule, default_rules};
use crate::core::stt::{DeepgramLinkConfig, STTConfig, STTError};
use crate::core::tts::openai::{DEFAULT_OPENAI_BASE_URL, OpenAITTSConfig};
use crate::core::tts::TTSError;
use crate::session::{SessionSettings, TurnPolicy, TurnSettings};

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

pub const DEFAULT_GREETING: &str = "Thanks for calling. Please tell me what happened.";
pub const DEFAULT_REPROMPT: &str = "Sorry, I didn't catch that. Could you say it again?";

/// Server configuration
///
/// Secrets are zeroized when the configuration is dropped.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL (`https://...`), used for stream and webhook URLs.
    pub public_url: String,

    // Telephony
    pub telephony_account_sid: Option<String>,
    pub telephony_auth_token: Option<String>,
    pub telephony_api_base_url: String,
    pub integration_mode: IntegrationMode,
    pub dispatch_mode: DispatchMode,
    pub greeting: String,
    pub reprompt: String,

    // Speech-to-text
    pub deepgram_api_key: Option<String>,
    pub stt_base_url: Option<String>,
    pub stt_model: String,
    pub stt_language: String,
    pub stt_encoding: String,
    pub stt_sample_rate: u32,
    pub stt_channels: u16,
    pub stt_punctuation: bool,
    pub stt_endpointing_ms: Option<u32>,

    // Text-to-speech
    pub tts_api_key: Option<String>,
    pub tts_base_url: String,
    pub tts_model: String,
    pub tts_voice: String,

    // Reply audio storage; in-memory when neither path nor bucket is set
    pub audio_storage_path: Option<PathBuf>,
    pub audio_s3_bucket: Option<String>,
    pub audio_storage_prefix: Option<String>,
    /// Base URL the telephony platform fetches audio from; defaults to `public_url`.
    pub audio_base_url: Option<String>,

    // Turn taking
    pub turn_policy: TurnPolicy,
    pub silence_window_ms: u64,
    pub min_utterance_chars: usize,
    pub pipeline_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub max_link_retries: u32,
    pub inbound_idle_timeout_secs: u64,

    // Decision
    pub decision_fallback_reply: String,
    pub decision_rules: Vec<DecisionRule>,

    // Security
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_concurrent_calls: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let session = SessionSettings::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            public_url: "http://localhost:3001".to_string(),
            telephony_account_sid: None,
            telephony_auth_token: None,
            telephony_api_base_url: DEFAULT_TELEPHONY_API_BASE.to_string(),
            integration_mode: IntegrationMode::default(),
            dispatch_mode: DispatchMode::default(),
            greeting: DEFAULT_GREETING.to_string(),
            reprompt: DEFAULT_REPROMPT.to_string(),
            deepgram_api_key: None,
            stt_base_url: None,
            stt_model: "nova-2-phonecall".to_string(),
            stt_language: "en-US".to_string(),
            stt_encoding: "mulaw".to_string(),
            stt_sample_rate: 8000,
            stt_channels: 1,
            stt_punctuation: true,
            stt_endpointing_ms: Some(300),
            tts_api_key: None,
            tts_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            audio_storage_path: None,
            audio_s3_bucket: None,
            audio_storage_prefix: None,
            audio_base_url: None,
            turn_policy: session.turn.policy,
            silence_window_ms: session.turn.silence_window.as_millis() as u64,
            min_utterance_chars: session.turn.min_utterance_chars,
            pipeline_timeout_ms: 15_000,
            handshake_timeout_ms: session.handshake_timeout.as_millis() as u64,
            max_link_retries: session.max_link_retries,
            inbound_idle_timeout_secs: session.inbound_idle_timeout.as_secs(),
            decision_fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            decision_rules: default_rules(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_concurrent_calls: None,
        }
    }
}

impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut token) = self.telephony_auth_token {
            token.zeroize();
        }
        if let Some(ref mut key) = self.deepgram_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.tts_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and defaults) only
    ///
    /// The .env file is loaded in main.rs before this is called.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate_all(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    ///
    /// # Example
    /// ```rust,no_run
    /// use callbridge::config::ServerConfig;
    /// use std::path::PathBuf;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config_path = PathBuf::from("config.yaml");
    /// let config = ServerConfig::from_file(&config_path)?;
    /// println!("Server listening on {}", config.address());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_all(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_telephony_credentials(&self) -> bool {
        self.telephony_account_sid.is_some() && self.telephony_auth_token.is_some()
    }

    /// Base URL prepended to `/audio/{key}` in dispatched directives.
    pub fn audio_public_base(&self) -> &str {
        self.audio_base_url
            .as_deref()
            .unwrap_or(&self.public_url)
            .trim_end_matches('/')
    }

    pub fn stt_config(&self) -> STTConfig {
        STTConfig {
            api_key: self.deepgram_api_key.clone().unwrap_or_default(),
            language: self.stt_language.clone(),
            sample_rate: self.stt_sample_rate,
            channels: self.stt_channels,
            punctuation: self.stt_punctuation,
            encoding: self.stt_encoding.clone(),
            model: self.stt_model.clone(),
        }
    }

    pub fn deepgram_link_config(&self) -> Result<DeepgramLinkConfig, STTError> {
        let mut link = DeepgramLinkConfig::from_base(self.stt_config())?;
        link.endpointing_ms = self.stt_endpointing_ms;
        if let Some(base_url) = &self.stt_base_url {
            link = link.with_base_url(base_url.clone());
        }
        Ok(link)
    }

    pub fn tts_config(&self) -> Result<OpenAITTSConfig, TTSError> {
        OpenAITTSConfig::from_names(
            self.tts_api_key.clone().unwrap_or_default(),
            self.tts_base_url.clone(),
            &self.tts_model,
            &self.tts_voice,
        )
    }

    pub fn turn_settings(&self) -> TurnSettings {
        TurnSettings {
            policy: self.turn_policy,
            silence_window: Duration::from_millis(self.silence_window_ms),
            min_utterance_chars: self.min_utterance_chars,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            turn: self.turn_settings(),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            max_link_retries: self.max_link_retries,
            inbound_idle_timeout: Duration::from_secs(self.inbound_idle_timeout_secs),
        }
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline_timeout_ms)
    }

    /// How a dispatched reply re-arms listening for the configured integration mode.
    pub fn rearm(&self) -> Rearm {
        Rearm::for_mode(
            self.integration_mode,
            &self.public_url,
            Some(self.stt_language.clone()),
        )
    }

    /// Effective configuration with secrets masked, for `check-config`.
    pub fn redacted(&self) -> serde_json::Value {
        let secret = |s: &Option<String>| s.as_deref().map(utils::redact);
        json!({
            "server": {
                "host": self.host,
                "port": self.port,
                "public_url": self.public_url,
            },
            "telephony": {
                "account_sid": self.telephony_account_sid,
                "auth_token": secret(&self.telephony_auth_token),
                "api_base_url": self.telephony_api_base_url,
                "integration_mode": self.integration_mode.to_string(),
                "dispatch_mode": self.dispatch_mode.to_string(),
                "greeting": self.greeting,
                "reprompt": self.reprompt,
            },
            "stt": {
                "deepgram_api_key": secret(&self.deepgram_api_key),
                "base_url": self.stt_base_url,
                "model": self.stt_model,
                "language": self.stt_language,
                "encoding": self.stt_encoding,
                "sample_rate": self.stt_sample_rate,
                "channels": self.stt_channels,
                "punctuation": self.stt_punctuation,
                "endpointing_ms": self.stt_endpointing_ms,
            },
            "tts": {
                "api_key": secret(&self.tts_api_key),
                "base_url": self.tts_base_url,
                "model": self.tts_model,
                "voice": self.tts_voice,
            },
            "storage": {
                "path": self.audio_storage_path.as_ref().map(|p| p.display().to_string()),
                "s3_bucket": self.audio_s3_bucket,
                "prefix": self.audio_storage_prefix,
                "audio_base_url": self.audio_public_base(),
            },
            "turn": {
                "policy": self.turn_policy,
                "silence_window_ms": self.silence_window_ms,
                "min_utterance_chars": self.min_utterance_chars,
                "pipeline_timeout_ms": self.pipeline_timeout_ms,
                "handshake_timeout_ms": self.handshake_timeout_ms,
                "max_link_retries": self.max_link_retries,
                "inbound_idle_timeout_secs": self.inbound_idle_timeout_secs,
            },
            "decision": {
                "fallback_reply": self.decision_fallback_reply,
                "rules": self.decision_rules,
            },
            "security": {
                "cors_allowed_origins": self.cors_allowed_origins,
                "rate_limit_requests_per_second": self.rate_limit_requests_per_second,
                "rate_limit_burst_size": self.rate_limit_burst_size,
                "max_concurrent_calls": self.max_concurrent_calls,
            },
        })
    }
}
