use serde::Deserialize;
use std::path::PathBuf;

use crate::core::decision::DecisionRule;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values present here override
/// environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   public_url: "https://bridge.example.com"
///
/// telephony:
///   account_sid: "ACxxxxxxxx"
///   auth_token: "your-auth-token"
///   integration_mode: stream     # stream | gather
///   dispatch_mode: rest_update   # rest_update | redirect
///   greeting: "Thanks for calling. Please tell me what happened."
///
/// stt:
///   deepgram_api_key: "your-deepgram-key"
///   model: "nova-2-phonecall"
///   language: "en-US"
///   encoding: "mulaw"
///   sample_rate: 8000
///   endpointing_ms: 300
///
/// tts:
///   api_key: "your-openai-key"
///   model: "tts-1"
///   voice: "alloy"
///
/// storage:
///   path: "/var/lib/callbridge/audio"
///   audio_base_url: "https://cdn.example.com"
///
/// turn:
///   policy: finality             # finality | silence | first_fragment
///   silence_window_ms: 1200
///   pipeline_timeout_ms: 15000
///
/// decision:
///   fallback_reply: "Could you tell me a little more?"
///   rules:
///     - pattern: "\\b(accident|crash)\\b"
///       reply: "Were you injured?"
///
/// security:
///   cors_allowed_origins: "*"
///   max_concurrent_calls: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub telephony: Option<TelephonyYaml>,
    pub stt: Option<SttYaml>,
    pub tts: Option<TtsYaml>,
    pub storage: Option<StorageYaml>,
    pub turn: Option<TurnYaml>,
    pub decision: Option<DecisionYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_url: Option<String>,
}

/// Telephony platform configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelephonyYaml {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub api_base_url: Option<String>,
    pub integration_mode: Option<String>,
    pub dispatch_mode: Option<String>,
    pub greeting: Option<String>,
    pub reprompt: Option<String>,
}

/// Speech-to-text configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SttYaml {
    pub deepgram_api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub punctuation: Option<bool>,
    /// 0 disables server-side endpointing
    pub endpointing_ms: Option<u32>,
}

/// Text-to-speech configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TtsYaml {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// Reply audio storage configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageYaml {
    pub path: Option<PathBuf>,
    pub s3_bucket: Option<String>,
    pub prefix: Option<String>,
    pub audio_base_url: Option<String>,
}

/// Turn-taking configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnYaml {
    pub policy: Option<String>,
    pub silence_window_ms: Option<u64>,
    pub min_utterance_chars: Option<usize>,
    pub pipeline_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub max_link_retries: Option<u32>,
    pub inbound_idle_timeout_secs: Option<u64>,
}

/// Reply decision configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DecisionYaml {
    pub fallback_reply: Option<String>,
    /// Replaces the built-in rules when present
    pub rules: Option<Vec<DecisionRule>>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
    /// Maximum simultaneously bridged calls
    pub max_concurrent_calls: Option<usize>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
