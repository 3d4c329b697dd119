//! Session — one resumable conversation.
//!
//! Owns the append-only message log, token accounting, and the state
//! machine. Drives the injected adapter on `send` and schedules
//! fire-and-forget persistence; the event channel fans every change out to
//! subscribers in log order.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::Notify;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use tether_adapter_core::{AdapterError, AgentAdapter, AgentEvent};
use tether_protocol::{
    summarize, Message, OptionsUpdate, SessionData, SessionMetadata, SessionOptions, SessionState,
    TokenUsage, UsageDelta, UserContent,
};

use crate::events::{EventChannel, SessionEvent, Subscription};
use crate::persist::{AgentPersister, PersistHandle};

#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation attempted from a state that forbids it.
    #[error("cannot {op} while session is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    /// `complete`/`delete` on a session that already reached a terminal state.
    #[error("session is already {state}")]
    AlreadyClosed { state: SessionState },

    /// A second `send` was issued while one is consuming the adapter stream.
    #[error("a send is already in flight")]
    SendInFlight,

    /// Subscription attempted after the event channel closed.
    #[error("session event channel is closed")]
    ChannelClosed,

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("persistence error: {0}")]
    Persistence(String),
}

struct SessionInner {
    state: SessionState,
    messages: Vec<Message>,
    usage: TokenUsage,
    options: SessionOptions,
    metadata: SessionMetadata,
}

/// One conversation with its own log, token accounting and state.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    adapter: Arc<dyn AgentAdapter>,
    persist: PersistHandle,
    events: EventChannel,
    /// Woken on any terminal transition so an in-flight send stops waiting
    /// on the adapter stream.
    closed: Notify,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Open a session, replaying any previously persisted messages into the
    /// live log and event stream so a reconnecting observer sees history.
    pub async fn open(
        id: String,
        mut options: SessionOptions,
        adapter: Arc<dyn AgentAdapter>,
        persister: Arc<dyn AgentPersister>,
        persist: PersistHandle,
    ) -> Result<Arc<Self>, SessionError> {
        let stored = persister
            .get_session(&id)
            .await
            .map_err(|e| SessionError::Persistence(e.to_string()))?;
        let history = persister
            .get_messages(&id, None, 0)
            .await
            .map_err(|e| SessionError::Persistence(e.to_string()))?;

        let created_at = stored.as_ref().map(|d| d.created_at).unwrap_or_else(Utc::now);
        let metadata = stored
            .as_ref()
            .and_then(|d| serde_json::from_value::<SessionMetadata>(d.metadata.clone()).ok())
            .unwrap_or_else(|| SessionMetadata {
                project_path: options.project_path.clone(),
                start_time: created_at,
                provider_session_id: options.resume_id.clone(),
                model: options.model.clone(),
            });

        // A restored provider session id makes the conversation resumable.
        if options.resume_id.is_none() {
            options.resume_id = metadata.provider_session_id.clone();
        }

        let events = EventChannel::new();
        for message in &history {
            events.publish(SessionEvent::MessageAdded(message.clone()));
        }

        let state = if history.is_empty() {
            SessionState::Created
        } else {
            SessionState::Idle
        };

        let session = Arc::new(Self {
            id,
            created_at,
            adapter,
            persist,
            events,
            closed: Notify::new(),
            inner: Mutex::new(SessionInner {
                state,
                messages: history,
                usage: TokenUsage::default(),
                options,
                metadata,
            }),
        });

        // First open of this id: make sure the session row exists before any
        // message write references it.
        if stored.is_none() {
            session
                .persist
                .save_session(session.session_data(), Some(session.events.clone()));
        }

        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn is_completed(&self) -> bool {
        self.state() == SessionState::Completed
    }

    /// A slice of the log. No side effects.
    pub fn messages(&self, limit: Option<usize>, offset: usize) -> Vec<Message> {
        let inner = self.inner.lock().unwrap();
        let end = limit
            .map(|l| (offset + l).min(inner.messages.len()))
            .unwrap_or(inner.messages.len());
        if offset >= inner.messages.len() {
            return Vec::new();
        }
        inner.messages[offset..end].to_vec()
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.inner.lock().unwrap().usage
    }

    pub fn metadata(&self) -> SessionMetadata {
        self.inner.lock().unwrap().metadata.clone()
    }

    pub fn summary(&self) -> String {
        summarize(&self.inner.lock().unwrap().messages)
    }

    /// Register an event listener. Fails once the session is terminal.
    pub fn subscribe(&self) -> Result<Subscription, SessionError> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: u64) {
        self.events.unsubscribe(id);
    }

    /// Send user content to the agent and consume the resulting stream.
    ///
    /// Rejects on terminal states and while another send is in flight. On
    /// clean stream exhaustion the session returns to idle; a stream failure
    /// is terminal.
    pub async fn send(&self, content: impl Into<UserContent>) -> Result<(), SessionError> {
        let content = content.into();
        let options = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                state if state.is_terminal() => {
                    return Err(SessionError::InvalidState { op: "send", state })
                }
                SessionState::Active => return Err(SessionError::SendInFlight),
                _ => {}
            }
            inner.state = SessionState::Active;
            inner.options.clone()
        };

        self.events.publish(SessionEvent::AgentActive);
        self.append_message(Message::user(content.clone()));

        let mut stream = self.adapter.stream(content, options);
        loop {
            if self.state().is_terminal() {
                // Aborted or closed mid-stream: drop remaining items silently.
                return Ok(());
            }
            let item = tokio::select! {
                item = stream.next() => item,
                _ = self.closed.notified() => return Ok(()),
            };
            let Some(item) = item else { break };
            match item {
                Ok(event) => self.apply_agent_event(event),
                Err(e) => return Err(self.fail(e)),
            }
        }

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != SessionState::Active {
                return Ok(());
            }
            inner.state = SessionState::Idle;
        }
        self.events.publish(SessionEvent::AgentCompleted);
        self.persist
            .save_session(self.session_data(), Some(self.events.clone()));
        Ok(())
    }

    /// Abort the in-flight send. Only valid while active.
    pub fn abort(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != SessionState::Active {
                return Err(SessionError::InvalidState {
                    op: "abort",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Aborted;
        }
        info!(
            component = "session",
            event = "session.aborted",
            session_id = %self.id,
            "Session aborted"
        );
        self.events
            .publish(SessionEvent::Lifecycle(SessionState::Aborted));
        self.events.close();
        self.closed.notify_waiters();
        Ok(())
    }

    /// Mark the conversation finished. Valid from any non-terminal state.
    pub fn complete(&self) -> Result<(), SessionError> {
        self.close(SessionState::Completed)?;
        self.persist.save_session(self.session_data(), None);
        Ok(())
    }

    /// Remove the session, erasing its durable copy. Valid from any
    /// non-terminal state.
    pub fn delete(&self) -> Result<(), SessionError> {
        self.close(SessionState::Deleted)?;
        self.persist.delete_session(self.id.clone());
        Ok(())
    }

    fn close(&self, target: SessionState) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return Err(SessionError::AlreadyClosed { state: inner.state });
            }
            inner.state = target;
        }
        self.events.publish(SessionEvent::Lifecycle(target));
        self.events.close();
        self.closed.notify_waiters();
        Ok(())
    }

    /// Persisted projection: summary plus activity stamp.
    pub fn session_data(&self) -> SessionData {
        let inner = self.inner.lock().unwrap();
        SessionData {
            id: self.id.clone(),
            summary: summarize(&inner.messages),
            created_at: self.created_at,
            last_activity: Utc::now(),
            cwd: inner.metadata.project_path.clone(),
            metadata: serde_json::to_value(&inner.metadata).unwrap_or(Value::Null),
        }
    }

    fn apply_agent_event(&self, event: AgentEvent) {
        match event {
            AgentEvent::MessageCreated {
                message,
                updated_options,
                usage,
            } => {
                if let Some(update) = updated_options {
                    self.merge_options(&update);
                }
                self.append_message(message);
                if let Some(delta) = usage {
                    self.apply_usage(&delta);
                }
            }
            AgentEvent::StreamStarted { message_id } => {
                self.events.publish(SessionEvent::StreamStarted { message_id });
            }
            AgentEvent::StreamDelta { message_id, text } => {
                self.events
                    .publish(SessionEvent::StreamChunk { message_id, text });
            }
            AgentEvent::StreamCompleted { message_id } => {
                self.events.publish(SessionEvent::StreamEnded { message_id });
            }
            AgentEvent::ToolCompleted {
                tool_id,
                output,
                duration_ms,
            } => self.attach_tool_result(&tool_id, &output, duration_ms),
            AgentEvent::UsageReported(delta) => self.apply_usage(&delta),
        }
    }

    /// The adapter captured a provider-side resumable id; merge it so the
    /// next send resumes the same provider conversation.
    fn merge_options(&self, update: &OptionsUpdate) {
        let mut inner = self.inner.lock().unwrap();
        inner.options.merge(update);
        if let Some(resume_id) = &update.resume_id {
            inner.metadata.provider_session_id = Some(resume_id.clone());
        }
        if let Some(model) = &update.model {
            inner.metadata.model = Some(model.clone());
        }
    }

    fn append_message(&self, message: Message) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.messages.push(message.clone());
        }
        self.events.publish(SessionEvent::MessageAdded(message.clone()));
        self.events.publish(SessionEvent::PersistStarted);
        self.persist
            .save_message(self.id.clone(), message, Some(self.events.clone()));
    }

    fn apply_usage(&self, delta: &UsageDelta) {
        let usage = {
            let mut inner = self.inner.lock().unwrap();
            inner.usage.apply(delta);
            inner.usage
        };
        self.events.publish(SessionEvent::UsageUpdated(usage));
    }

    /// Attach a tool result to the pending tool-use message with this id.
    fn attach_tool_result(&self, tool_id: &str, output: &str, duration_ms: Option<u64>) {
        let updated = {
            let mut inner = self.inner.lock().unwrap();
            let mut updated = None;
            for message in inner.messages.iter_mut().rev() {
                if message.attach_tool_result(tool_id, output) {
                    updated = Some(message.clone());
                    break;
                }
            }
            updated
        };
        match updated {
            Some(message) => {
                self.events.publish(SessionEvent::MessageUpdated {
                    message_id: message.id().to_string(),
                    tool_result: output.to_string(),
                    duration_ms,
                });
                self.persist
                    .save_message(self.id.clone(), message, Some(self.events.clone()));
            }
            None => warn!(
                component = "session",
                event = "session.tool_result.unmatched",
                session_id = %self.id,
                tool_id = %tool_id,
                "Tool result without a matching tool-use message"
            ),
        }
    }

    /// Fatal stream failure: terminal error state, inline error message for
    /// the UI, failure published to every subscriber.
    fn fail(&self, error: AdapterError) -> SessionError {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = SessionState::Error;
        }
        let text = error.to_string();
        self.append_message(Message::error(text.clone(), Value::Null));
        self.events
            .publish(SessionEvent::AgentError { message: text });
        self.events.close();
        self.persist.save_session(self.session_data(), None);
        SessionError::Adapter(error)
    }
}
