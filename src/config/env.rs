use std::path::PathBuf;

use super::ServerConfig;
use super::utils::{env_var, parse_bool_env, parse_env, parse_env_opt};
use crate::core::control::{DispatchMode, IntegrationMode};
use crate::core::decision::DecisionRule;
use crate::session::TurnPolicy;

/// Every environment variable the server reads.
pub(crate) const ENV_VARS: &[&str] = &[
    "HOST",
    "PORT",
    "PUBLIC_URL",
    "TWILIO_ACCOUNT_SID",
    "TWILIO_AUTH_TOKEN",
    "TWILIO_API_BASE_URL",
    "INTEGRATION_MODE",
    "DISPATCH_MODE",
    "GREETING_MESSAGE",
    "REPROMPT_MESSAGE",
    "DEEPGRAM_API_KEY",
    "DEEPGRAM_BASE_URL",
    "STT_MODEL",
    "STT_LANGUAGE",
    "STT_ENCODING",
    "STT_SAMPLE_RATE",
    "STT_CHANNELS",
    "STT_PUNCTUATION",
    "STT_ENDPOINTING_MS",
    "OPENAI_API_KEY",
    "TTS_BASE_URL",
    "TTS_MODEL",
    "TTS_VOICE",
    "AUDIO_STORAGE_PATH",
    "AUDIO_S3_BUCKET",
    "AUDIO_STORAGE_PREFIX",
    "AUDIO_BASE_URL",
    "TURN_POLICY",
    "TURN_SILENCE_WINDOW_MS",
    "TURN_MIN_UTTERANCE_CHARS",
    "PIPELINE_TIMEOUT_MS",
    "STT_HANDSHAKE_TIMEOUT_MS",
    "STT_MAX_LINK_RETRIES",
    "INBOUND_IDLE_TIMEOUT_SECS",
    "DECISION_FALLBACK_REPLY",
    "DECISION_RULES_JSON",
    "CORS_ALLOWED_ORIGINS",
    "RATE_LIMIT_REQUESTS_PER_SECOND",
    "RATE_LIMIT_BURST_SIZE",
    "MAX_CONCURRENT_CALLS",
];

/// Build a configuration from environment variables layered over defaults.
pub(crate) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    // Server
    if let Some(host) = env_var("HOST") {
        config.host = host;
    }
    config.port = parse_env("PORT", config.port)?;
    if let Some(public_url) = env_var("PUBLIC_URL") {
        config.public_url = public_url;
    }

    // Telephony
    config.telephony_account_sid = env_var("TWILIO_ACCOUNT_SID");
    config.telephony_auth_token = env_var("TWILIO_AUTH_TOKEN");
    if let Some(base) = env_var("TWILIO_API_BASE_URL") {
        config.telephony_api_base_url = base;
    }
    config.integration_mode = parse_env::<IntegrationMode>("INTEGRATION_MODE", config.integration_mode)?;
    config.dispatch_mode = parse_env::<DispatchMode>("DISPATCH_MODE", config.dispatch_mode)?;
    if let Some(greeting) = env_var("GREETING_MESSAGE") {
        config.greeting = greeting;
    }
    if let Some(reprompt) = env_var("REPROMPT_MESSAGE") {
        config.reprompt = reprompt;
    }

    // Speech-to-text
    config.deepgram_api_key = env_var("DEEPGRAM_API_KEY");
    config.stt_base_url = env_var("DEEPGRAM_BASE_URL");
    if let Some(model) = env_var("STT_MODEL") {
        config.stt_model = model;
    }
    if let Some(language) = env_var("STT_LANGUAGE") {
        config.stt_language = language;
    }
    if let Some(encoding) = env_var("STT_ENCODING") {
        config.stt_encoding = encoding;
    }
    config.stt_sample_rate = parse_env("STT_SAMPLE_RATE", config.stt_sample_rate)?;
    config.stt_channels = parse_env("STT_CHANNELS", config.stt_channels)?;
    config.stt_punctuation = parse_bool_env("STT_PUNCTUATION", config.stt_punctuation)?;
    if let Some(ms) = parse_env_opt::<u32>("STT_ENDPOINTING_MS")? {
        // 0 disables server-side endpointing
        config.stt_endpointing_ms = (ms > 0).then_some(ms);
    }

    // Text-to-speech
    config.tts_api_key = env_var("OPENAI_API_KEY");
    if let Some(base) = env_var("TTS_BASE_URL") {
        config.tts_base_url = base;
    }
    if let Some(model) = env_var("TTS_MODEL") {
        config.tts_model = model;
    }
    if let Some(voice) = env_var("TTS_VOICE") {
        config.tts_voice = voice;
    }

    // Storage
    config.audio_storage_path = env_var("AUDIO_STORAGE_PATH").map(PathBuf::from);
    config.audio_s3_bucket = env_var("AUDIO_S3_BUCKET");
    config.audio_storage_prefix = env_var("AUDIO_STORAGE_PREFIX");
    config.audio_base_url = env_var("AUDIO_BASE_URL");

    // Turn taking
    config.turn_policy = parse_env::<TurnPolicy>("TURN_POLICY", config.turn_policy)?;
    config.silence_window_ms = parse_env("TURN_SILENCE_WINDOW_MS", config.silence_window_ms)?;
    config.min_utterance_chars =
        parse_env("TURN_MIN_UTTERANCE_CHARS", config.min_utterance_chars)?;
    config.pipeline_timeout_ms = parse_env("PIPELINE_TIMEOUT_MS", config.pipeline_timeout_ms)?;
    config.handshake_timeout_ms =
        parse_env("STT_HANDSHAKE_TIMEOUT_MS", config.handshake_timeout_ms)?;
    config.max_link_retries = parse_env("STT_MAX_LINK_RETRIES", config.max_link_retries)?;
    config.inbound_idle_timeout_secs =
        parse_env("INBOUND_IDLE_TIMEOUT_SECS", config.inbound_idle_timeout_secs)?;

    // Decision
    if let Some(fallback) = env_var("DECISION_FALLBACK_REPLY") {
        config.decision_fallback_reply = fallback;
    }
    if let Some(raw) = env_var("DECISION_RULES_JSON") {
        config.decision_rules = serde_json::from_str::<Vec<DecisionRule>>(&raw)
            .map_err(|e| format!("Invalid DECISION_RULES_JSON: {e}"))?;
    }

    // Security
    config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
    config.rate_limit_requests_per_second = parse_env(
        "RATE_LIMIT_REQUESTS_PER_SECOND",
        config.rate_limit_requests_per_second,
    )?;
    config.rate_limit_burst_size = parse_env("RATE_LIMIT_BURST_SIZE", config.rate_limit_burst_size)?;
    config.max_concurrent_calls = parse_env_opt("MAX_CONCURRENT_CALLS")?;

    Ok(config)
}
