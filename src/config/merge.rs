use super::ServerConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;

/// Merge environment configuration with optional YAML overrides
///
/// Environment variables (and defaults) form the base; any value present in the YAML
/// file replaces it.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(public_url) = server.public_url {
            config.public_url = public_url;
        }
    }

    if let Some(telephony) = yaml.telephony {
        if telephony.account_sid.is_some() {
            config.telephony_account_sid = telephony.account_sid;
        }
        if telephony.auth_token.is_some() {
            config.telephony_auth_token = telephony.auth_token;
        }
        if let Some(base) = telephony.api_base_url {
            config.telephony_api_base_url = base;
        }
        if let Some(mode) = telephony.integration_mode {
            config.integration_mode = mode
                .parse()
                .map_err(|e| format!("telephony.integration_mode: {e}"))?;
        }
        if let Some(mode) = telephony.dispatch_mode {
            config.dispatch_mode = mode
                .parse()
                .map_err(|e| format!("telephony.dispatch_mode: {e}"))?;
        }
        if let Some(greeting) = telephony.greeting {
            config.greeting = greeting;
        }
        if let Some(reprompt) = telephony.reprompt {
            config.reprompt = reprompt;
        }
    }

    if let Some(stt) = yaml.stt {
        if stt.deepgram_api_key.is_some() {
            config.deepgram_api_key = stt.deepgram_api_key;
        }
        if stt.base_url.is_some() {
            config.stt_base_url = stt.base_url;
        }
        if let Some(model) = stt.model {
            config.stt_model = model;
        }
        if let Some(language) = stt.language {
            config.stt_language = language;
        }
        if let Some(encoding) = stt.encoding {
            config.stt_encoding = encoding;
        }
        if let Some(sample_rate) = stt.sample_rate {
            config.stt_sample_rate = sample_rate;
        }
        if let Some(channels) = stt.channels {
            config.stt_channels = channels;
        }
        if let Some(punctuation) = stt.punctuation {
            config.stt_punctuation = punctuation;
        }
        if let Some(ms) = stt.endpointing_ms {
            config.stt_endpointing_ms = (ms > 0).then_some(ms);
        }
    }

    if let Some(tts) = yaml.tts {
        if tts.api_key.is_some() {
            config.tts_api_key = tts.api_key;
        }
        if let Some(base) = tts.base_url {
            config.tts_base_url = base;
        }
        if let Some(model) = tts.model {
            config.tts_model = model;
        }
        if let Some(voice) = tts.voice {
            config.tts_voice = voice;
        }
    }

    if let Some(storage) = yaml.storage {
        if storage.path.is_some() {
            config.audio_storage_path = storage.path;
        }
        if storage.s3_bucket.is_some() {
            config.audio_s3_bucket = storage.s3_bucket;
        }
        if storage.prefix.is_some() {
            config.audio_storage_prefix = storage.prefix;
        }
        if storage.audio_base_url.is_some() {
            config.audio_base_url = storage.audio_base_url;
        }
    }

    if let Some(turn) = yaml.turn {
        if let Some(policy) = turn.policy {
            config.turn_policy = policy.parse().map_err(|e| format!("turn.policy: {e}"))?;
        }
        if let Some(ms) = turn.silence_window_ms {
            config.silence_window_ms = ms;
        }
        if let Some(chars) = turn.min_utterance_chars {
            config.min_utterance_chars = chars;
        }
        if let Some(ms) = turn.pipeline_timeout_ms {
            config.pipeline_timeout_ms = ms;
        }
        if let Some(ms) = turn.handshake_timeout_ms {
            config.handshake_timeout_ms = ms;
        }
        if let Some(retries) = turn.max_link_retries {
            config.max_link_retries = retries;
        }
        if let Some(secs) = turn.inbound_idle_timeout_secs {
            config.inbound_idle_timeout_secs = secs;
        }
    }

    if let Some(decision) = yaml.decision {
        if let Some(fallback) = decision.fallback_reply {
            config.decision_fallback_reply = fallback;
        }
        if let Some(rules) = decision.rules {
            config.decision_rules = rules;
        }
    }

    if let Some(security) = yaml.security {
        if security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = security.cors_allowed_origins;
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if security.max_concurrent_calls.is_some() {
            config.max_concurrent_calls = security.max_concurrent_calls;
        }
    }

    Ok(config)
}
