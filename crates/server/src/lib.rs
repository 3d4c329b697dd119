//! Tether server
//!
//! The session runtime: state machine, pluggable adapter and persister,
//! per-session event fan-out, and the WebSocket bridge multiplexing many
//! sessions over one connection.

pub mod agent;
pub mod api;
pub mod bridge;
pub mod events;
pub mod logging;
pub mod persist;
pub mod session;
pub mod ws;

pub use agent::Agent;
pub use bridge::WebSocketBridge;
pub use events::{EventChannel, SessionEvent, Subscription};
pub use persist::{AgentPersister, PersistError, PersistHandle, SqlitePersister};
pub use session::{Session, SessionError};
