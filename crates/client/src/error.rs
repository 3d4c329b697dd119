use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("reconnect failed after {attempts} attempts")]
    ReconnectFailed { attempts: u32 },

    /// The server reported an agent failure for this session.
    #[error("agent error: {0}")]
    Agent(String),

    #[error("a send is already pending for this session")]
    SendPending,

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
