//! Test doubles: scripted dialers and a recording scheduler.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_client::{ClientError, Connection, Dialer, Scheduler};

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingScheduler {
    pub delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
        tokio::task::yield_now().await;
    }
}

/// Dialer that always fails, counting attempts.
#[derive(Default)]
pub struct FailingDialer {
    pub calls: AtomicU32,
}

#[async_trait]
impl Dialer for FailingDialer {
    async fn dial(&self, _url: &str) -> Result<Connection, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Connect("connection refused".to_string()))
    }
}

/// The far side of one scripted connection.
pub struct Remote {
    /// Inject server → client frames.
    pub to_client: mpsc::Sender<String>,
    /// Observe client → server frames.
    pub from_client: mpsc::Receiver<String>,
}

/// Dialer that hands out pre-scripted channel pairs, then fails.
pub struct ScriptedDialer {
    connections: Mutex<Vec<Connection>>,
    pub calls: AtomicU32,
}

impl ScriptedDialer {
    /// Build `count` connections; returns the dialer and the remote end of
    /// each, in dial order.
    pub fn with_connections(count: usize) -> (Self, Vec<Remote>) {
        let mut connections = Vec::new();
        let mut remotes = Vec::new();
        for _ in 0..count {
            let (to_client, incoming) = mpsc::channel(64);
            let (outgoing, from_client) = mpsc::channel(64);
            connections.push(Connection { outgoing, incoming });
            remotes.push(Remote {
                to_client,
                from_client,
            });
        }
        // Dials pop from the front.
        connections.reverse();
        (
            Self {
                connections: Mutex::new(connections),
                calls: AtomicU32::new(0),
            },
            remotes,
        )
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, _url: &str) -> Result<Connection, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.connections
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ClientError::Connect("script exhausted".to_string()))
    }
}
