//! BrowserAgent — owns the one transport connection and demultiplexes it
//! into per-session proxies.
//!
//! The connection lifecycle is an explicit state machine: disconnected →
//! connecting → connected → disconnected, with capped exponential backoff
//! between attempts and a terminal reconnect-failed notification once the
//! attempt budget is spent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use tether_protocol::{ClientCommand, ServerEvent};

use crate::dialer::{Connection, Dialer, WsDialer};
use crate::reconnect::{ConnectionState, ReconnectPolicy, Scheduler, TokioScheduler};
use crate::session::VirtualSession;

/// Connection-level notifications surfaced to the UI.
#[derive(Debug, Clone)]
pub enum AgentNotification {
    Connected,
    Disconnected,
    /// Reconnection was abandoned; the agent stays disconnected.
    ReconnectFailed { attempts: u32 },
    TransportError(String),
}

struct BrowserAgentInner {
    url: String,
    dialer: Arc<dyn Dialer>,
    scheduler: Arc<dyn Scheduler>,
    policy: ReconnectPolicy,
    sessions: Mutex<HashMap<String, Arc<VirtualSession>>>,
    state: Mutex<ConnectionState>,
    notifications: broadcast::Sender<AgentNotification>,
    command_tx: mpsc::Sender<ClientCommand>,
}

impl BrowserAgentInner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn notify(&self, notification: AgentNotification) {
        let _ = self.notifications.send(notification);
    }

    /// Route one inbound frame. Unknown session ids are logged and dropped;
    /// the connection never crashes on a bad frame.
    fn route(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(ServerEvent::Event {
                session_id,
                event_name,
                event_data,
            }) => {
                let session = self.sessions.lock().unwrap().get(&session_id).cloned();
                match session {
                    Some(session) => session.handle_event(&event_name, event_data),
                    None => debug!(
                        component = "browser_agent",
                        event = "client.route.unknown_session",
                        session_id = %session_id,
                        event_name = %event_name,
                        "Event for unknown session dropped"
                    ),
                }
            }
            Ok(ServerEvent::Error { session_id, error }) => match session_id {
                Some(session_id) => {
                    let session = self.sessions.lock().unwrap().get(&session_id).cloned();
                    match session {
                        Some(session) => session.handle_error(error.message),
                        None => warn!(
                            component = "browser_agent",
                            event = "client.route.error_unknown_session",
                            session_id = %session_id,
                            message = %error.message,
                            "Error for unknown session dropped"
                        ),
                    }
                }
                None => warn!(
                    component = "browser_agent",
                    event = "client.route.global_error",
                    message = %error.message,
                    "Server error"
                ),
            },
            Err(e) => warn!(
                component = "browser_agent",
                event = "client.route.parse_failed",
                error = %e,
                payload_bytes = text.len(),
                "Failed to parse server frame"
            ),
        }
    }

    fn fail_all_pending(&self, attempts: u32) {
        for session in self.sessions.lock().unwrap().values() {
            session.fail_pending(attempts);
        }
    }
}

pub struct BrowserAgent {
    inner: Arc<BrowserAgentInner>,
    command_rx: Mutex<Option<mpsc::Receiver<ClientCommand>>>,
}

impl BrowserAgent {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_parts(
            url,
            Arc::new(WsDialer),
            Arc::new(TokioScheduler),
            ReconnectPolicy::default(),
        )
    }

    /// Construct with injected transport and clock, for tests and embedders.
    pub fn with_parts(
        url: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        scheduler: Arc<dyn Scheduler>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (notifications, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(BrowserAgentInner {
                url: url.into(),
                dialer,
                scheduler,
                policy,
                sessions: Mutex::new(HashMap::new()),
                state: Mutex::new(ConnectionState::Disconnected),
                notifications,
                command_tx,
            }),
            command_rx: Mutex::new(Some(command_rx)),
        }
    }

    /// Start the connection loop. Subsequent calls are no-ops.
    pub fn connect(&self) {
        let Some(command_rx) = self.command_rx.lock().unwrap().take() else {
            return;
        };
        tokio::spawn(run(self.inner.clone(), command_rx));
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    pub fn notifications(&self) -> broadcast::Receiver<AgentNotification> {
        self.inner.notifications.subscribe()
    }

    /// Idempotent proxy lookup: returns the existing proxy or lazily
    /// creates one.
    pub fn session(&self, id: &str) -> Arc<VirtualSession> {
        let mut sessions = self.inner.sessions.lock().unwrap();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(VirtualSession::new(
                    id.to_string(),
                    self.inner.command_tx.clone(),
                ))
            })
            .clone()
    }

    /// Drop a proxy's local state. The connection is untouched.
    pub fn remove_session(&self, id: &str) {
        self.inner.sessions.lock().unwrap().remove(id);
    }
}

async fn run(inner: Arc<BrowserAgentInner>, mut command_rx: mpsc::Receiver<ClientCommand>) {
    let mut attempts: u32 = 0;
    loop {
        inner.set_state(ConnectionState::Connecting);
        match inner.dialer.dial(&inner.url).await {
            Ok(connection) => {
                // Successful open resets the attempt counter.
                attempts = 0;
                inner.set_state(ConnectionState::Connected);
                inner.notify(AgentNotification::Connected);
                info!(
                    component = "browser_agent",
                    event = "client.connected",
                    url = %inner.url,
                    "Connected"
                );

                pump(&inner, connection, &mut command_rx).await;

                inner.set_state(ConnectionState::Disconnected);
                inner.notify(AgentNotification::Disconnected);
                info!(
                    component = "browser_agent",
                    event = "client.disconnected",
                    url = %inner.url,
                    "Disconnected, scheduling reconnect"
                );
            }
            Err(e) => {
                inner.notify(AgentNotification::TransportError(e.to_string()));
                warn!(
                    component = "browser_agent",
                    event = "client.connect_failed",
                    url = %inner.url,
                    error = %e,
                    "Connect failed"
                );
            }
        }

        attempts += 1;
        if attempts >= inner.policy.max_attempts {
            inner.set_state(ConnectionState::Disconnected);
            inner.notify(AgentNotification::ReconnectFailed { attempts });
            inner.fail_all_pending(attempts);
            warn!(
                component = "browser_agent",
                event = "client.reconnect_failed",
                attempts = attempts,
                "Reconnection abandoned"
            );
            return;
        }
        inner
            .scheduler
            .sleep(inner.policy.next_delay(attempts - 1))
            .await;
    }
}

/// Shovel commands out and frames in until the connection ends.
async fn pump(
    inner: &Arc<BrowserAgentInner>,
    mut connection: Connection,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
) {
    loop {
        tokio::select! {
            maybe_command = command_rx.recv() => {
                let Some(command) = maybe_command else { return };
                match serde_json::to_string(&command) {
                    Ok(json) => {
                        if connection.outgoing.send(json).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(
                        component = "browser_agent",
                        event = "client.command.serialize_failed",
                        error = %e,
                        "Failed to serialize command"
                    ),
                }
            }
            maybe_frame = connection.incoming.recv() => {
                let Some(text) = maybe_frame else { return };
                inner.route(&text);
            }
        }
    }
}
