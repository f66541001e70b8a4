//! HTTP and WebSocket request handlers
//!
//! This module organizes all handlers into logical groups:
//! - `api` - Health check and call statistics
//! - `audio` - Synthesized reply audio retrieval
//! - `stream` - Media-stream WebSocket, one call session per connection
//! - `voice` - Telephony webhooks answering with TwiML

pub mod api;
pub mod audio;
pub mod stream;
pub mod voice;

pub use stream::{stream_handler, stream_handler_for_call};
