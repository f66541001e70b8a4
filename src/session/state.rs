use std::fmt;

/// Lifecycle of a call session.
///
/// `Connecting -> Streaming -> TurnPending -> Streaming ... -> Closing -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Inbound stream accepted, transcription link not ready or no `start` yet.
    #[default]
    Connecting,
    /// Both legs ready; audio flows to the link.
    Streaming,
    /// A reply pipeline is running. Audio keeps flowing.
    TurnPending,
    Closing,
    Closed,
}

impl SessionState {
    /// Audio is forwarded only in these states.
    #[inline]
    pub fn is_listening(&self) -> bool {
        matches!(self, SessionState::Streaming | SessionState::TurnPending)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }

    /// Where a session settles once both legs are up or a reply finishes.
    pub fn settle(legs_ready: bool, turn_in_flight: bool) -> SessionState {
        match (legs_ready, turn_in_flight) {
            (false, _) => SessionState::Connecting,
            (true, true) => SessionState::TurnPending,
            (true, false) => SessionState::Streaming,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::TurnPending => "turn-pending",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
