//! Wire envelopes — JSON over the transport connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::UserContent;

/// Commands sent from client to server. Every command names the session it
/// targets so many sessions can share one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "session:send", rename_all = "camelCase")]
    Send {
        session_id: String,
        content: UserContent,
    },
    #[serde(rename = "session:abort", rename_all = "camelCase")]
    Abort { session_id: String },
    #[serde(rename = "session:complete", rename_all = "camelCase")]
    Complete { session_id: String },
    #[serde(rename = "session:delete", rename_all = "camelCase")]
    Delete { session_id: String },
}

impl ClientCommand {
    pub fn session_id(&self) -> &str {
        match self {
            ClientCommand::Send { session_id, .. }
            | ClientCommand::Abort { session_id }
            | ClientCommand::Complete { session_id }
            | ClientCommand::Delete { session_id } => session_id,
        }
    }
}

/// Envelopes sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A forwarded session event.
    #[serde(rename_all = "camelCase")]
    Event {
        session_id: String,
        event_name: String,
        event_data: Value,
    },
    /// A dispatch failure or adapter error.
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        error: WireError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
}

impl WireError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
