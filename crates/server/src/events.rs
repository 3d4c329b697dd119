//! Per-session event fan-out.
//!
//! Each session owns one `EventChannel`: a table of registered listeners
//! flushed synchronously in registration order on every publish. Closing
//! the channel (session termination) drops all listeners and rejects
//! further subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use tether_protocol::{Message, SessionState, TokenUsage};

use crate::session::SessionError;

/// Events published on a session's channel. The bridge forwards each of
/// these to the wire under its `wire_name`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A send started consuming the adapter stream.
    AgentActive,
    /// The adapter stream ended cleanly; the session is idle again.
    AgentCompleted,
    /// The adapter stream failed; the session is dead.
    AgentError { message: String },

    MessageAdded(Message),
    /// A tool result was attached to a previously emitted tool-use message.
    MessageUpdated {
        message_id: String,
        tool_result: String,
        duration_ms: Option<u64>,
    },

    StreamStarted { message_id: String },
    StreamChunk { message_id: String, text: String },
    StreamEnded { message_id: String },

    UsageUpdated(TokenUsage),

    /// Terminal lifecycle transition: completed, aborted or deleted.
    Lifecycle(SessionState),

    PersistStarted,
    PersistSucceeded,
    PersistFailed { message: String },
}

impl SessionEvent {
    /// The `eventName` this event travels under on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            SessionEvent::AgentActive => "agent:active",
            SessionEvent::AgentCompleted => "agent:completed",
            SessionEvent::AgentError { .. } => "agent:error",
            SessionEvent::MessageAdded(message) => match message.type_name() {
                "user" => "message:user",
                "agent" => "message:agent",
                "tool" => "message:tool",
                "system" => "message:system",
                _ => "message:error",
            },
            SessionEvent::MessageUpdated { .. } => "message:updated",
            SessionEvent::StreamStarted { .. } => "stream:start",
            SessionEvent::StreamChunk { .. } => "stream:chunk",
            SessionEvent::StreamEnded { .. } => "stream:end",
            SessionEvent::UsageUpdated(_) => "tokens:updated",
            SessionEvent::Lifecycle(state) => match state {
                SessionState::Completed => "session:completed",
                SessionState::Aborted => "session:aborted",
                _ => "session:deleted",
            },
            SessionEvent::PersistStarted => "persist:start",
            SessionEvent::PersistSucceeded => "persist:success",
            SessionEvent::PersistFailed { .. } => "persist:error",
        }
    }

    /// The `eventData` payload for the wire envelope.
    pub fn wire_payload(&self) -> Value {
        match self {
            SessionEvent::AgentActive
            | SessionEvent::AgentCompleted
            | SessionEvent::PersistStarted
            | SessionEvent::PersistSucceeded => Value::Null,
            SessionEvent::AgentError { message } => json!({ "message": message }),
            SessionEvent::MessageAdded(message) => {
                serde_json::to_value(message).unwrap_or(Value::Null)
            }
            SessionEvent::MessageUpdated {
                message_id,
                tool_result,
                duration_ms,
            } => json!({
                "messageId": message_id,
                "toolResult": tool_result,
                "durationMs": duration_ms,
            }),
            SessionEvent::StreamStarted { message_id } => json!({ "messageId": message_id }),
            SessionEvent::StreamChunk { message_id, text } => {
                json!({ "messageId": message_id, "text": text })
            }
            SessionEvent::StreamEnded { message_id } => json!({ "messageId": message_id }),
            SessionEvent::UsageUpdated(usage) => {
                serde_json::to_value(usage).unwrap_or(Value::Null)
            }
            SessionEvent::Lifecycle(state) => json!({ "state": state.as_str() }),
            SessionEvent::PersistFailed { message } => json!({ "message": message }),
        }
    }
}

/// A registered listener: the id deregisters it, the receiver drains events.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::UnboundedReceiver<SessionEvent>,
}

struct ChannelInner {
    subscribers: Vec<(u64, mpsc::UnboundedSender<SessionEvent>)>,
    closed: bool,
}

/// Cheap-to-clone handle to a session's event channel.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<Mutex<ChannelInner>>,
    next_id: Arc<AtomicU64>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                subscribers: Vec::new(),
                closed: false,
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a listener. Fails once the channel has been closed.
    pub fn subscribe(&self) -> Result<Subscription, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(SessionError::ChannelClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push((id, tx));
        Ok(Subscription { id, rx })
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver an event to every listener in registration order. No-op once
    /// closed; dropped receivers are pruned as they are discovered.
    pub fn publish(&self, event: SessionEvent) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Close the channel: no further emissions, no further subscriptions.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}
