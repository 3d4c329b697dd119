//! Transport dial abstraction.
//!
//! A dialed connection is a pair of text-frame channels; the production
//! dialer pumps them to a real WebSocket. Tests inject scripted dialers to
//! simulate drops without sockets.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::debug;

use crate::error::ClientError;

/// One live transport connection. Dropping either half ends it.
pub struct Connection {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Connection, ClientError>;
}

/// Production dialer over tokio-tungstenite.
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<Connection, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::channel::<String>(64);
        let (incoming_tx, incoming) = mpsc::channel::<String>(64);

        tokio::spawn(async move {
            while let Some(line) = outgoing_rx.recv().await {
                if ws_tx
                    .send(tungstenite::Message::Text(line.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(tungstenite::Message::Text(text)) => {
                        if incoming_tx.send(text.as_str().to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(tungstenite::Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(
                            component = "browser_agent",
                            event = "ws.read.error",
                            error = %e,
                            "WebSocket read error"
                        );
                        break;
                    }
                }
            }
            // incoming_tx drops here; the router observes the close.
        });

        Ok(Connection { outgoing, incoming })
    }
}
