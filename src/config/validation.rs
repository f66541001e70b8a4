use tracing::warn;
use url::Url;

use super::ServerConfig;
use crate::core::control::DispatchMode;
use crate::core::decision::KeywordDecision;
use crate::session::TurnPolicy;

/// Run every validation step against a merged configuration.
pub(crate) fn validate_all(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_public_url(&config.public_url)?;
    validate_telephony(config)?;
    validate_stt(config)?;
    validate_storage(config)?;
    validate_turn(config)?;
    validate_decision(config)?;
    validate_security(config)?;
    Ok(())
}

/// The public URL is used to build stream, webhook and audio URLs.
pub(crate) fn validate_public_url(public_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(public_url).map_err(|e| format!("Invalid PUBLIC_URL {public_url}: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("PUBLIC_URL must use http or https, got {other}").into()),
    }
}

pub(crate) fn validate_telephony(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.telephony_account_sid.is_some() != config.telephony_auth_token.is_some() {
        return Err(
            "TWILIO_ACCOUNT_SID and TWILIO_AUTH_TOKEN must be configured together".into(),
        );
    }
    Url::parse(&config.telephony_api_base_url)
        .map_err(|e| format!("Invalid telephony API base URL: {e}"))?;

    if !config.has_telephony_credentials() {
        warn!("Telephony credentials not configured; streamed replies cannot be dispatched");
    } else if config.dispatch_mode == DispatchMode::Redirect
        && config.public_url.starts_with("http://localhost")
    {
        warn!("Redirect dispatch with a localhost PUBLIC_URL is unreachable from the platform");
    }
    Ok(())
}

pub(crate) fn validate_stt(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.deepgram_api_key.is_none() {
        warn!("DEEPGRAM_API_KEY not configured; media streams will fail to transcribe");
    }
    let link = config
        .deepgram_link_config()
        .map_err(|e| format!("stt: {e}"))?;
    link.build_websocket_url()
        .map_err(|e| format!("stt.base_url: {e}"))?;
    Ok(())
}

pub(crate) fn validate_storage(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.audio_storage_path.is_some() && config.audio_s3_bucket.is_some() {
        return Err("Configure either AUDIO_STORAGE_PATH or AUDIO_S3_BUCKET, not both".into());
    }
    if let Some(base) = &config.audio_base_url {
        Url::parse(base).map_err(|e| format!("Invalid AUDIO_BASE_URL {base}: {e}"))?;
    }
    Ok(())
}

pub(crate) fn validate_turn(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.turn_policy == TurnPolicy::Silence && config.silence_window_ms == 0 {
        return Err("TURN_SILENCE_WINDOW_MS must be greater than 0 for the silence policy".into());
    }
    if config.pipeline_timeout_ms == 0 {
        return Err("PIPELINE_TIMEOUT_MS must be greater than 0".into());
    }
    if config.handshake_timeout_ms == 0 {
        return Err("STT_HANDSHAKE_TIMEOUT_MS must be greater than 0".into());
    }
    if config.inbound_idle_timeout_secs == 0 {
        return Err("INBOUND_IDLE_TIMEOUT_SECS must be greater than 0".into());
    }
    Ok(())
}

pub(crate) fn validate_decision(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.decision_fallback_reply.trim().is_empty() {
        return Err("Decision fallback reply must not be empty".into());
    }
    KeywordDecision::new(&config.decision_rules, config.decision_fallback_reply.clone())?;
    Ok(())
}

pub(crate) fn validate_security(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.rate_limit_requests_per_second == 0 {
        return Err("RATE_LIMIT_REQUESTS_PER_SECOND must be greater than 0".into());
    }
    if config.rate_limit_burst_size == 0 {
        return Err("RATE_LIMIT_BURST_SIZE must be greater than 0".into());
    }
    if config.max_concurrent_calls == Some(0) {
        return Err("MAX_CONCURRENT_CALLS must be greater than 0 when set".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decision::DecisionRule;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_all(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_public_url_scheme() {
        assert!(validate_public_url("https://bridge.example.com").is_ok());
        assert!(validate_public_url("wss://bridge.example.com").is_err());
        assert!(validate_public_url("not a url").is_err());
    }

    #[test]
    fn test_half_configured_credentials() {
        let mut config = ServerConfig::default();
        config.telephony_account_sid = Some("AC123".to_string());
        assert!(validate_telephony(&config).is_err());

        config.telephony_auth_token = Some("token".to_string());
        assert!(validate_telephony(&config).is_ok());
    }

    #[test]
    fn test_stt_rejects_unknown_encoding() {
        let mut config = ServerConfig::default();
        config.stt_encoding = "ogg-vorbis".to_string();
        assert!(validate_stt(&config).is_err());
    }

    #[test]
    fn test_stt_rejects_http_base_url() {
        let mut config = ServerConfig::default();
        config.stt_base_url = Some("http://api.deepgram.com".to_string());
        assert!(validate_stt(&config).is_err());
    }

    #[test]
    fn test_storage_backends_exclusive() {
        let mut config = ServerConfig::default();
        config.audio_storage_path = Some(PathBuf::from("/tmp/audio"));
        config.audio_s3_bucket = Some("bucket".to_string());
        assert!(validate_storage(&config).is_err());
    }

    #[test]
    fn test_turn_timeouts() {
        let mut config = ServerConfig::default();
        config.turn_policy = TurnPolicy::Silence;
        config.silence_window_ms = 0;
        assert!(validate_turn(&config).is_err());

        let mut config = ServerConfig::default();
        config.pipeline_timeout_ms = 0;
        assert!(validate_turn(&config).is_err());
    }

    #[test]
    fn test_decision_rules_must_compile() {
        let mut config = ServerConfig::default();
        config.decision_rules = vec![DecisionRule::new("[a-", "broken")];
        assert!(validate_decision(&config).is_err());

        config.decision_rules = vec![DecisionRule::new(r"\bok\b", "Great.")];
        assert!(validate_decision(&config).is_ok());
    }

    #[test]
    fn test_security_limits() {
        let mut config = ServerConfig::default();
        config.max_concurrent_calls = Some(0);
        assert!(validate_security(&config).is_err());

        let mut config = ServerConfig::default();
        config.rate_limit_burst_size = 0;
        assert!(validate_security(&config).is_err());
    }
}
