use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use tracing::{debug, info, warn};

use super::{
    CallControl, ControlError, DispatchMode, REPLY_PATH, Rearm, TwimlResponse, is_valid_call_id,
    reply_twiml,
};
use crate::core::pipeline::ReplyDirective;

pub const DEFAULT_TELEPHONY_API_BASE: &str = "https://api.twilio.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Change applied to an in-progress call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallUpdate {
    /// Replace the call's current instructions with an inline document.
    Twiml(String),
    /// Make the platform fetch new instructions from `url`.
    Redirect { url: String },
}

/// Client for the call-update endpoint of the telephony REST API.
#[derive(Clone)]
pub struct TelephonyClient {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl TelephonyClient {
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ControlError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        })
    }

    fn call_url(&self, call_id: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_id
        )
    }

    pub async fn update_call(&self, call_id: &str, update: &CallUpdate) -> Result<(), ControlError> {
        if !is_valid_call_id(call_id) {
            return Err(ControlError::InvalidCallId(call_id.to_string()));
        }

        let form: Vec<(&str, &str)> = match update {
            CallUpdate::Twiml(twiml) => vec![("Twiml", twiml.as_str())],
            CallUpdate::Redirect { url } => vec![("Url", url.as_str()), ("Method", "POST")],
        };

        let response = self
            .http
            .post(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| ControlError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControlError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(call_id, "Call updated");
        Ok(())
    }
}

// =============================================================================
// REST update with inline TwiML
// =============================================================================

pub struct RestUpdateControl {
    client: TelephonyClient,
    rearm: Rearm,
}

impl RestUpdateControl {
    pub fn new(client: TelephonyClient, rearm: Rearm) -> Self {
        Self { client, rearm }
    }
}

#[async_trait]
impl CallControl for RestUpdateControl {
    async fn dispatch(&self, directive: &ReplyDirective) -> Result<(), ControlError> {
        let twiml = reply_twiml(directive, &self.rearm);
        self.client
            .update_call(&directive.call_id, &CallUpdate::Twiml(twiml))
            .await?;
        info!(
            call_id = %directive.call_id,
            turn = directive.turn,
            "Reply dispatched via call update"
        );
        Ok(())
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::RestUpdate
    }
}

// =============================================================================
// Webhook redirect
// =============================================================================

/// How long a reply document waits for the platform's fetch.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(120);

/// Reply documents waiting for the platform to fetch them, one per call.
///
/// Documents the platform never fetches (caller hung up, dispatch cut short)
/// expire after the TTL.
#[derive(Debug)]
pub struct DirectiveBoard {
    pending: Cache<String, String>,
}

impl Default for DirectiveBoard {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_PENDING_TTL)
    }
}

impl DirectiveBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            pending: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Post a document, replacing any the platform has not fetched yet.
    pub fn post(&self, call_id: &str, twiml: String) {
        if self.pending.contains_key(call_id) {
            warn!(call_id, "Replaced an unfetched reply document");
        }
        self.pending.insert(call_id.to_string(), twiml);
    }

    /// Take the pending document; each one is served at most once.
    pub fn take(&self, call_id: &str) -> Option<String> {
        // `remove` also returns entries that expired but are not evicted yet.
        self.pending.get(call_id)?;
        self.pending.remove(call_id)
    }

    pub fn len(&self) -> usize {
        self.pending.run_pending_tasks();
        self.pending.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RedirectControl {
    client: TelephonyClient,
    public_url: String,
    rearm: Rearm,
    board: Arc<DirectiveBoard>,
}

impl RedirectControl {
    pub fn new(
        client: TelephonyClient,
        public_url: impl Into<String>,
        rearm: Rearm,
        board: Arc<DirectiveBoard>,
    ) -> Self {
        Self {
            client,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            rearm,
            board,
        }
    }

    fn reply_url(&self, call_id: &str) -> String {
        format!("{}{}/{}", self.public_url, REPLY_PATH, call_id)
    }
}

#[async_trait]
impl CallControl for RedirectControl {
    async fn dispatch(&self, directive: &ReplyDirective) -> Result<(), ControlError> {
        self.board
            .post(&directive.call_id, reply_twiml(directive, &self.rearm));

        let update = CallUpdate::Redirect {
            url: self.reply_url(&directive.call_id),
        };
        if let Err(e) = self.client.update_call(&directive.call_id, &update).await {
            // Nobody will fetch it now.
            self.board.take(&directive.call_id);
            return Err(e);
        }

        info!(
            call_id = %directive.call_id,
            turn = directive.turn,
            "Reply dispatched via redirect"
        );
        Ok(())
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Redirect
    }
}

/// Used when no control-plane credentials are configured. Every dispatch
/// fails, which the session reports as a failed turn.
pub struct UnconfiguredControl;

#[async_trait]
impl CallControl for UnconfiguredControl {
    async fn dispatch(&self, directive: &ReplyDirective) -> Result<(), ControlError> {
        Err(ControlError::NotConfigured(format!(
            "no telephony credentials; dropping reply for call {}",
            directive.call_id
        )))
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::RestUpdate
    }
}

/// Fallback document when the platform follows a redirect with nothing pending.
pub fn rearm_only_twiml(rearm: &Rearm, call_id: &str) -> String {
    rearm.apply(TwimlResponse::new(), call_id).render()
}
