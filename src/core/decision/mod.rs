//! Reply decision: caller utterance in, reply text out.
//!
//! The bridge treats this step as a black box behind [`Decision`].
//! [`KeywordDecision`] is a small ordered-rule classifier good enough for
//! scripted intake flows; anything smarter plugs in through the same trait.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecisionError {
    #[error("Empty utterance")]
    EmptyUtterance,
    #[error("Invalid rule pattern {pattern:?}: {reason}")]
    InvalidRule { pattern: String, reason: String },
    #[error("Decision failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Decision: Send + Sync {
    async fn decide(&self, utterance: &str) -> Result<String, DecisionError>;
}

/// One keyword rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRule {
    /// Case-insensitive regular expression matched against the utterance.
    pub pattern: String,
    pub reply: String,
}

impl DecisionRule {
    pub fn new(pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reply: reply.into(),
        }
    }
}

pub const DEFAULT_FALLBACK_REPLY: &str = "Could you tell me a little more about what happened?";

/// Rules used when none are configured.
pub fn default_rules() -> Vec<DecisionRule> {
    vec![
        DecisionRule::new(
            r"\b(good ?bye|bye|that'?s all|hang up)\b",
            "Thank you for calling. Goodbye.",
        ),
        DecisionRule::new(
            r"\b(accident|crash|collision|fell|slipped)\b",
            "Were you injured?",
        ),
        DecisionRule::new(
            r"\b(injur\w*|hurt|pain|broken|hospital)\b",
            "I'm sorry to hear that. Did you receive medical treatment?",
        ),
        DecisionRule::new(
            r"\b(yes|yeah|i did)\b",
            "Thank you. When did this happen?",
        ),
        DecisionRule::new(r"\b(no|nope|not really)\b", "Understood. Where did this happen?"),
    ]
}

/// First matching rule wins; otherwise the fallback reply.
pub struct KeywordDecision {
    rules: Vec<(Regex, String)>,
    fallback: String,
}

impl KeywordDecision {
    pub fn new(rules: &[DecisionRule], fallback: impl Into<String>) -> Result<Self, DecisionError> {
        let rules = rules
            .iter()
            .map(|rule| {
                RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (re, rule.reply.clone()))
                    .map_err(|e| DecisionError::InvalidRule {
                        pattern: rule.pattern.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            fallback: fallback.into(),
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn classify(&self, utterance: &str) -> &str {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(utterance))
            .map(|(_, reply)| reply.as_str())
            .unwrap_or(&self.fallback)
    }
}

#[async_trait]
impl Decision for KeywordDecision {
    async fn decide(&self, utterance: &str) -> Result<String, DecisionError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(DecisionError::EmptyUtterance);
        }
        let reply = self.classify(utterance);
        debug!(utterance, reply, "Keyword decision");
        Ok(reply.to_string())
    }
}

/// Adapts a plain function into a [`Decision`].
pub struct FnDecision<F>(pub F);

#[async_trait]
impl<F> Decision for FnDecision<F>
where
    F: Fn(&str) -> Result<String, DecisionError> + Send + Sync,
{
    async fn decide(&self, utterance: &str) -> Result<String, DecisionError> {
        (self.0)(utterance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake() -> KeywordDecision {
        KeywordDecision::new(&default_rules(), DEFAULT_FALLBACK_REPLY).unwrap()
    }

    #[tokio::test]
    async fn test_accident_asks_about_injuries() {
        let reply = intake().decide("I was in an accident").await.unwrap();
        assert_eq!(reply, "Were you injured?");
    }

    #[tokio::test]
    async fn test_rules_are_case_insensitive_and_ordered() {
        let decision = intake();
        assert_eq!(
            decision.decide("My back is HURT").await.unwrap(),
            "I'm sorry to hear that. Did you receive medical treatment?"
        );
        // Goodbye wins over the accident rule because it comes first.
        assert_eq!(
            decision.decide("the crash, that's all, bye").await.unwrap(),
            "Thank you for calling. Goodbye."
        );
    }

    #[tokio::test]
    async fn test_fallback_and_empty() {
        let decision = intake();
        assert_eq!(
            decision.decide("purple elephants").await.unwrap(),
            DEFAULT_FALLBACK_REPLY
        );
        assert_eq!(
            decision.decide("  ").await.unwrap_err(),
            DecisionError::EmptyUtterance
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let err = KeywordDecision::new(&[DecisionRule::new("(unclosed", "x")], "y").err();
        assert!(matches!(err, Some(DecisionError::InvalidRule { .. })));
    }

    #[tokio::test]
    async fn test_fn_decision() {
        let decision = FnDecision(|u: &str| Ok::<_, DecisionError>(format!("echo: {u}")));
        assert_eq!(decision.decide("hi").await.unwrap(), "echo: hi");
    }
}
