//! Tether adapter contract
//!
//! Adapters talk to one generative-AI provider and translate its raw
//! message stream into the common tether event vocabulary. The session
//! runtime consumes `AgentEvent`s without knowing which provider produced
//! them.

use futures::stream::BoxStream;
use thiserror::Error;

use tether_protocol::{Message, OptionsUpdate, SessionOptions, UsageDelta, UserContent};

/// Errors that can occur in adapters
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Process communication error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Provider error: {0}")]
    ProviderError(String),
}

/// Events yielded by an adapter stream.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A new domain message. `updated_options` carries the provider's
    /// resumable session id the first time it is seen; `usage` carries
    /// token counts when the raw message reported them inline.
    MessageCreated {
        message: Message,
        updated_options: Option<OptionsUpdate>,
        usage: Option<UsageDelta>,
    },

    /// Incremental text streaming for an in-flight agent message.
    StreamStarted { message_id: String },
    StreamDelta { message_id: String, text: String },
    StreamCompleted { message_id: String },

    /// A provider-reported tool completion. Raw tool-result messages are
    /// suppressed and surfaced as this update to the matching tool-use
    /// message instead of a new log entry.
    ToolCompleted {
        tool_id: String,
        output: String,
        duration_ms: Option<u64>,
    },

    /// Token counts from a usage/result raw message. Produces no new
    /// domain message.
    UsageReported(UsageDelta),
}

impl AgentEvent {
    pub fn message(message: Message) -> Self {
        AgentEvent::MessageCreated {
            message,
            updated_options: None,
            usage: None,
        }
    }
}

/// The adapter stream type: an asynchronous sequence of events ending on
/// stream exhaustion or a fatal provider error.
pub type AgentStream = BoxStream<'static, Result<AgentEvent, AdapterError>>;

/// Pluggable provider strategy. One adapter instance may serve many
/// sessions; each `stream` call is one conversational turn.
pub trait AgentAdapter: Send + Sync {
    /// Stable provider name, e.g. `"claude"`.
    fn name(&self) -> &str;

    /// Run one turn against the provider, translating its raw messages
    /// into domain events. Any provider failure surfaces as an `Err` item
    /// and is fatal for the turn.
    fn stream(&self, prompt: UserContent, options: SessionOptions) -> AgentStream;
}
