//! VirtualSession — the client-side proxy for one server session.
//!
//! Exposes the Session operation surface but implements it by emitting
//! wire commands over the shared connection. `send` resolves on the next
//! terminal turn event; the other operations are emit-only. A local
//! append-only mirror of received messages supports offline inspection.

use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use tether_protocol::{summarize, ClientCommand, Message, SessionMetadata, TokenUsage, UserContent};

use crate::error::ClientError;

/// A re-emitted session event for local UI consumption.
#[derive(Debug, Clone)]
pub struct SessionEventFrame {
    pub name: String,
    pub data: Value,
}

struct VirtualInner {
    messages: Vec<Message>,
    usage: Option<TokenUsage>,
    active: bool,
    completed: bool,
    pending_send: Option<oneshot::Sender<Result<(), ClientError>>>,
}

pub struct VirtualSession {
    id: String,
    commands: mpsc::Sender<ClientCommand>,
    events: broadcast::Sender<SessionEventFrame>,
    inner: Mutex<VirtualInner>,
}

impl VirtualSession {
    pub(crate) fn new(id: String, commands: mpsc::Sender<ClientCommand>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            id,
            commands,
            events,
            inner: Mutex::new(VirtualInner {
                messages: Vec::new(),
                usage: None,
                active: false,
                completed: false,
                pending_send: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send user content and wait for the turn to finish. Resolves on the
    /// server's `agent:completed`, rejects on `agent:error`.
    pub async fn send(&self, content: impl Into<UserContent>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.pending_send.is_some() {
                return Err(ClientError::SendPending);
            }
            inner.pending_send = Some(tx);
        }

        let command = ClientCommand::Send {
            session_id: self.id.clone(),
            content: content.into(),
        };
        if let Err(e) = self.emit(command).await {
            self.inner.lock().unwrap().pending_send = None;
            return Err(e);
        }

        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Emit-only: no round-trip acknowledgment.
    pub async fn abort(&self) -> Result<(), ClientError> {
        self.emit(ClientCommand::Abort {
            session_id: self.id.clone(),
        })
        .await
    }

    pub async fn complete(&self) -> Result<(), ClientError> {
        self.emit(ClientCommand::Complete {
            session_id: self.id.clone(),
        })
        .await
    }

    pub async fn delete(&self) -> Result<(), ClientError> {
        self.emit(ClientCommand::Delete {
            session_id: self.id.clone(),
        })
        .await
    }

    async fn emit(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Slice of the local message mirror.
    pub fn messages(&self, limit: Option<usize>, offset: usize) -> Vec<Message> {
        let inner = self.inner.lock().unwrap();
        if offset >= inner.messages.len() {
            return Vec::new();
        }
        let end = limit
            .map(|l| (offset + l).min(inner.messages.len()))
            .unwrap_or(inner.messages.len());
        inner.messages[offset..end].to_vec()
    }

    /// The last usage snapshot the server pushed; `None` before any. No
    /// independent client-side accounting.
    pub fn token_usage(&self) -> Option<TokenUsage> {
        self.inner.lock().unwrap().usage
    }

    /// Session metadata is not tracked client-side; it stays `None` until
    /// fetched separately through the collaborator API.
    pub fn metadata(&self) -> Option<SessionMetadata> {
        None
    }

    pub fn summary(&self) -> String {
        summarize(&self.inner.lock().unwrap().messages)
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().active
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().unwrap().completed
    }

    /// Subscribe to re-emitted session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEventFrame> {
        self.events.subscribe()
    }

    /// Apply one routed server event to the local mirror, then re-emit it.
    pub(crate) fn handle_event(&self, name: &str, data: Value) {
        {
            let mut inner = self.inner.lock().unwrap();
            match name {
                "message:user" | "message:agent" | "message:tool" | "message:system"
                | "message:error" => {
                    match serde_json::from_value::<Message>(data.clone()) {
                        Ok(message) => inner.messages.push(message),
                        Err(e) => debug!(
                            component = "virtual_session",
                            event = "client.event.bad_message",
                            session_id = %self.id,
                            error = %e,
                            "Dropping unparseable message event"
                        ),
                    }
                }
                "message:updated" => {
                    apply_message_update(&mut inner.messages, &data);
                }
                "tokens:updated" => {
                    if let Ok(usage) = serde_json::from_value::<TokenUsage>(data.clone()) {
                        inner.usage = Some(usage);
                    }
                }
                "agent:active" => inner.active = true,
                "agent:completed" => {
                    inner.active = false;
                    if let Some(tx) = inner.pending_send.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                "agent:error" => {
                    inner.active = false;
                    let message = data
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("agent stream failed")
                        .to_string();
                    if let Some(tx) = inner.pending_send.take() {
                        let _ = tx.send(Err(ClientError::Agent(message)));
                    }
                }
                "session:completed" => {
                    inner.active = false;
                    inner.completed = true;
                }
                "session:aborted" | "session:deleted" => inner.active = false,
                _ => {}
            }
        }
        let _ = self.events.send(SessionEventFrame {
            name: name.to_string(),
            data,
        });
    }

    /// A wire error envelope addressed to this session behaves like an
    /// agent error.
    pub(crate) fn handle_error(&self, message: String) {
        if let Some(tx) = self.inner.lock().unwrap().pending_send.take() {
            let _ = tx.send(Err(ClientError::Agent(message.clone())));
        }
        let _ = self.events.send(SessionEventFrame {
            name: "agent:error".to_string(),
            data: serde_json::json!({ "message": message }),
        });
    }

    /// Reject a pending send when the connection is gone for good.
    pub(crate) fn fail_pending(&self, attempts: u32) {
        if let Some(tx) = self.inner.lock().unwrap().pending_send.take() {
            let _ = tx.send(Err(ClientError::ReconnectFailed { attempts }));
        }
    }
}

fn apply_message_update(messages: &mut [Message], data: &Value) {
    let (Some(message_id), Some(tool_result)) = (
        data.get("messageId").and_then(|v| v.as_str()),
        data.get("toolResult").and_then(|v| v.as_str()),
    ) else {
        return;
    };
    for message in messages.iter_mut() {
        if message.id() == message_id {
            if let Message::Agent {
                tool_use: Some(tool_use),
                ..
            } = message
            {
                tool_use.tool_result = Some(tool_result.to_string());
            }
            return;
        }
    }
}
