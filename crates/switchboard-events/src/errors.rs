//! Event bus error types.

use thiserror::Error;

/// A listener refused or failed to handle an event.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ListenerError {
    /// Human-readable message.
    pub message: String,
}

impl ListenerError {
    /// Create a listener error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A dispatch was aborted by a listener error.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Listener for '{event}' failed: {source}")]
pub struct EventError {
    /// Event name being dispatched.
    pub event: String,
    /// The listener's error.
    #[source]
    pub source: ListenerError,
}
