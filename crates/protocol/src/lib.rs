//! Tether Protocol
//!
//! Shared types for communication between the tether server and clients.
//! These types are serialized as JSON over WebSocket.

use uuid::Uuid;

pub mod message;
pub mod summary;
pub mod types;
pub mod wire;

pub use message::{ContentBlock, Message, ToolUse, UserContent};
pub use summary::{summarize, SUMMARY_PLACEHOLDER};
pub use types::{
    OptionsUpdate, SessionData, SessionMetadata, SessionOptions, SessionState, TokenUsage,
    UsageDelta,
};
pub use wire::{ClientCommand, ServerEvent, WireError};

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
