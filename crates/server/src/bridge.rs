//! WebSocket bridge — binds one session to one transport connection.
//!
//! Construction subscribes to the session's event channel and forwards
//! every event to the wire as an `event` envelope. Inbound commands
//! dispatch to session methods; failures become `error` envelopes instead
//! of dropping the connection. `destroy` deregisters the subscription and
//! leaves the session untouched.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use tether_protocol::{ClientCommand, ServerEvent, WireError};

use crate::session::{Session, SessionError};

pub struct WebSocketBridge {
    session: Arc<Session>,
    subscription_id: u64,
    forward_task: JoinHandle<()>,
    outbound: mpsc::Sender<ServerEvent>,
}

impl WebSocketBridge {
    /// Bind `session` to the connection represented by `outbound`.
    pub fn new(
        session: Arc<Session>,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<Self, SessionError> {
        let subscription = session.subscribe()?;
        let subscription_id = subscription.id;
        let mut rx = subscription.rx;

        let session_id = session.id().to_string();
        let wire = outbound.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let envelope = ServerEvent::Event {
                    session_id: session_id.clone(),
                    event_name: event.wire_name().to_string(),
                    event_data: event.wire_payload(),
                };
                if wire.send(envelope).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            session,
            subscription_id,
            forward_task,
            outbound,
        })
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// Parse and dispatch a raw inbound frame. Malformed or unknown command
    /// types produce a wire error and keep the connection alive.
    pub async fn handle_raw(&self, text: &str) {
        match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => self.handle_command(command).await,
            Err(e) => {
                debug!(
                    component = "bridge",
                    event = "bridge.command.parse_failed",
                    session_id = %self.session.id(),
                    error = %e,
                    "Failed to parse client command"
                );
                self.send_error(None, e.to_string()).await;
            }
        }
    }

    /// Route one command to the bound session. Errors from the dispatched
    /// call are converted to wire error responses.
    pub async fn handle_command(&self, command: ClientCommand) {
        if command.session_id() != self.session.id() {
            self.send_error(
                Some(command.session_id().to_string()),
                format!("command addressed to unbound session {}", command.session_id()),
            )
            .await;
            return;
        }

        let result = match command {
            ClientCommand::Send { content, .. } => {
                // A send runs for the whole adapter stream; detach it so the
                // inbound loop keeps draining commands (abort in particular).
                let session = self.session.clone();
                let outbound = self.outbound.clone();
                let session_id = self.session.id().to_string();
                tokio::spawn(async move {
                    if let Err(e) = session.send(content).await {
                        let _ = outbound
                            .send(ServerEvent::Error {
                                session_id: Some(session_id),
                                error: WireError::new(e.to_string()),
                            })
                            .await;
                    }
                });
                Ok(())
            }
            ClientCommand::Abort { .. } => self.session.abort(),
            ClientCommand::Complete { .. } => self.session.complete(),
            ClientCommand::Delete { .. } => self.session.delete(),
        };

        if let Err(e) = result {
            self.send_error(Some(self.session.id().to_string()), e.to_string())
                .await;
        }
    }

    async fn send_error(&self, session_id: Option<String>, message: String) {
        let _ = self
            .outbound
            .send(ServerEvent::Error {
                session_id,
                error: WireError::new(message),
            })
            .await;
    }

    /// Deregister the event subscription. The session itself is untouched
    /// and may still be driven by other collaborators.
    pub fn destroy(&self) {
        self.session.unsubscribe(self.subscription_id);
        self.forward_task.abort();
    }
}
