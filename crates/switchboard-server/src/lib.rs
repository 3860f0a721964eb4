//! # switchboard-server
//!
//! Axum HTTP + `WebSocket` transport for the Switchboard dispatcher.
//!
//! - `GET /ws`: upgrade, one session task per connection feeding the
//!   dispatcher in FIFO order, with server pings and an idle timeout
//! - `GET /health` and `GET /metrics` (Prometheus text)
//! - Connection cap (503 beyond `maxConnections`)
//! - Graceful shutdown via `CancellationToken`, draining session tasks

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::{ServerHandle, SwitchboardServer};
