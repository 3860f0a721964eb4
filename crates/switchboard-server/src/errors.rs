//! Server error types.

use switchboard_runtime::PluginError;
use thiserror::Error;

/// Failures starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A plugin failed to register or boot.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The metrics recorder could not be installed.
    #[error("Metrics recorder: {0}")]
    Metrics(String),

    /// The serve task panicked or was aborted.
    #[error("Server task failed: {0}")]
    Task(String),
}
