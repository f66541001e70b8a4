//! Turn detection: when has the caller finished speaking?

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::stt::TranscriptEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPolicy {
    /// Complete on a final (or end-of-turn) event once text has accumulated.
    #[default]
    Finality,
    /// Complete after a quiet window with no new fragments.
    Silence,
    /// Complete on the first non-empty fragment.
    FirstFragment,
}

impl FromStr for TurnPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "finality" | "final" => Ok(Self::Finality),
            "silence" => Ok(Self::Silence),
            "first_fragment" | "first" => Ok(Self::FirstFragment),
            other => Err(format!("Unknown turn policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnSettings {
    pub policy: TurnPolicy,
    pub silence_window: Duration,
    pub min_utterance_chars: usize,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            policy: TurnPolicy::Finality,
            silence_window: Duration::from_millis(1200),
            min_utterance_chars: 1,
        }
    }
}

/// Accumulates transcript fragments for the current turn.
///
/// Final segments append; an interim fragment replaces the previous interim.
#[derive(Debug)]
pub struct TurnController {
    settings: TurnSettings,
    finals: Vec<String>,
    interim: Option<String>,
    last_fragment_at: Option<Instant>,
}

impl TurnController {
    pub fn new(settings: TurnSettings) -> Self {
        Self {
            settings,
            finals: Vec::new(),
            interim: None,
            last_fragment_at: None,
        }
    }

    /// Feed one event; returns the turn text when the turn completes.
    pub fn observe(&mut self, event: &TranscriptEvent, now: Instant) -> Option<String> {
        let text = event.text.trim();
        if !text.is_empty() {
            if event.is_final {
                self.finals.push(text.to_string());
                self.interim = None;
            } else {
                self.interim = Some(text.to_string());
            }
            self.last_fragment_at = Some(now);
        }

        let complete = match self.settings.policy {
            TurnPolicy::Finality => event.is_final || event.end_of_turn,
            TurnPolicy::Silence => false,
            TurnPolicy::FirstFragment => !text.is_empty(),
        };

        if complete { self.take_turn() } else { None }
    }

    /// When the silence window closes, if the policy uses one.
    pub fn silence_deadline(&self) -> Option<Instant> {
        if self.settings.policy != TurnPolicy::Silence || !self.has_text() {
            return None;
        }
        self.last_fragment_at
            .map(|at| at + self.settings.silence_window)
    }

    /// Complete the turn if the silence window has elapsed.
    pub fn on_silence(&mut self, now: Instant) -> Option<String> {
        match self.silence_deadline() {
            Some(deadline) if now >= deadline => self.take_turn(),
            _ => None,
        }
    }

    pub fn has_text(&self) -> bool {
        !self.finals.is_empty() || self.interim.is_some()
    }

    fn take_turn(&mut self) -> Option<String> {
        if !self.has_text() {
            return None;
        }

        let mut parts: Vec<String> = std::mem::take(&mut self.finals);
        // A final clears the interim, so any interim left is newer speech.
        if let Some(interim) = self.interim.take() {
            parts.push(interim);
        }
        self.last_fragment_at = None;

        let text = parts.join(" ").trim().to_string();
        if text.chars().count() < self.settings.min_utterance_chars.max(1) {
            return None;
        }
        Some(text)
    }
}
