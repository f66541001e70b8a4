//! Per-call session management.
//!
//! - [`call`]: the session task and its state machine
//! - [`turn`]: turn-completion policies
//! - [`registry`]: process-wide call id to session mapping

mod call;
mod registry;
mod state;
mod turn;

pub use call::{CallSession, SessionContext, SessionError, SessionSettings, SessionSummary};
pub use registry::{RegistryEntry, SessionRegistry};
pub use state::SessionState;
pub use turn::{TurnController, TurnPolicy, TurnSettings};
