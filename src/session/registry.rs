//! Process-wide map from call id to its live session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Distinguishes successive sessions for the same call id.
    pub generation: u64,
    pub connection_id: String,
    /// Cancelled when the session ends or is superseded.
    pub live: CancellationToken,
    pub registered_at: Instant,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, RegistryEntry>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `call_id` and return its generation.
    ///
    /// A session already registered under the same id is superseded: its
    /// live token is cancelled so it winds down and cannot dispatch replies.
    pub fn register(&self, call_id: &str, connection_id: &str, live: CancellationToken) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = RegistryEntry {
            generation,
            connection_id: connection_id.to_string(),
            live,
            registered_at: Instant::now(),
        };

        if let Some(previous) = self.sessions.insert(call_id.to_string(), entry) {
            warn!(
                call_id,
                previous_connection = %previous.connection_id,
                "Superseding existing session for call"
            );
            previous.live.cancel();
        }

        info!(call_id, connection_id, generation, "Session registered");
        generation
    }

    /// Remove the entry only if it still belongs to `generation`.
    pub fn remove(&self, call_id: &str, generation: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(call_id, |_, entry| entry.generation == generation)
            .is_some();
        if removed {
            info!(call_id, generation, "Session unregistered");
        }
        removed
    }

    pub fn get(&self, call_id: &str) -> Option<RegistryEntry> {
        self.sessions.get(call_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.sessions.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Cancel every live session, e.g. on server shutdown.
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            entry.live.cancel();
        }
    }
}
