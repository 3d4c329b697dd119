//! WebSocket handling
//!
//! One connection carries many sessions: inbound commands are routed by
//! session id to a lazily created bridge per session, and every bridge
//! shares the connection's outbound channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tether_protocol::{ClientCommand, ServerEvent, WireError};

use crate::agent::Agent;
use crate::bridge::WebSocketBridge;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Frames that can be sent through the WebSocket.
enum OutboundFrame {
    Event(ServerEvent),
    Pong(Bytes),
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(agent): State<Arc<Agent>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, agent))
}

async fn handle_socket(socket: WebSocket, agent: Arc<Agent>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(256);

    // Forward outbound frames to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let result = match frame {
                OutboundFrame::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        warn!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server event"
                        );
                        continue;
                    }
                },
                OutboundFrame::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };
            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    // Bridges write ServerEvents; a pump maps them onto the frame channel.
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(256);
    let pump_tx = outbound_tx.clone();
    let pump_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if pump_tx.send(OutboundFrame::Event(event)).await.is_err() {
                break;
            }
        }
    });

    let mut bridges: HashMap<String, WebSocketBridge> = HashMap::new();

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundFrame::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        let command: ClientCommand = match serde_json::from_str(&text) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.command.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = text.len(),
                    "Failed to parse client command"
                );
                let _ = event_tx
                    .send(ServerEvent::Error {
                        session_id: None,
                        error: WireError::new(e.to_string()),
                    })
                    .await;
                continue;
            }
        };

        let session_id = command.session_id().to_string();
        if !bridges.contains_key(&session_id) {
            match agent.get_session(&session_id).await {
                Ok(Some(session)) => match WebSocketBridge::new(session, event_tx.clone()) {
                    Ok(bridge) => {
                        bridges.insert(session_id.clone(), bridge);
                    }
                    Err(e) => {
                        let _ = event_tx
                            .send(ServerEvent::Error {
                                session_id: Some(session_id.clone()),
                                error: WireError::new(e.to_string()),
                            })
                            .await;
                    }
                },
                Ok(None) => {
                    let _ = event_tx
                        .send(ServerEvent::Error {
                            session_id: Some(session_id.clone()),
                            error: WireError::new(format!("unknown session: {session_id}")),
                        })
                        .await;
                }
                Err(e) => {
                    let _ = event_tx
                        .send(ServerEvent::Error {
                            session_id: Some(session_id.clone()),
                            error: WireError::new(e.to_string()),
                        })
                        .await;
                }
            }
        }

        if let Some(bridge) = bridges.get(&session_id) {
            bridge.handle_command(command).await;
        }
    }

    for bridge in bridges.values() {
        bridge.destroy();
    }
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
    pump_task.abort();
    send_task.abort();
}
