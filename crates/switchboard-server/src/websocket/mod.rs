//! WebSocket connection adapter and per-connection session loop.

pub mod connection;
pub mod session;

pub use connection::WsConnection;
pub use session::{SessionLimits, run_session};
