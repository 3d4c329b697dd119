//! Tether client
//!
//! One WebSocket connection shared by many logical sessions. The
//! `BrowserAgent` owns the connection and its reconnect loop; each
//! `VirtualSession` proxies one server session over it.

pub mod agent;
pub mod dialer;
pub mod error;
pub mod reconnect;
pub mod session;

pub use agent::{AgentNotification, BrowserAgent};
pub use dialer::{Connection, Dialer, WsDialer};
pub use error::ClientError;
pub use reconnect::{ConnectionState, ReconnectPolicy, Scheduler, TokioScheduler};
pub use session::{SessionEventFrame, VirtualSession};
