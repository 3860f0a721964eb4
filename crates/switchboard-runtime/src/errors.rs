//! Runtime error types.
//!
//! The dispatch taxonomy lives in `switchboard_core::errors`; these are the
//! extension-point failures owned by this crate.

use switchboard_core::{DispatchError, HandlerError, SendError};
use thiserror::Error;

/// A middleware step failed.
///
/// The pipeline contains these: the failure is logged and recorded as
/// `ErrorContinue`, and the chain keeps going.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MiddlewareError {
    /// Human-readable message.
    pub message: String,
}

impl MiddlewareError {
    /// Create a middleware error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<SendError> for MiddlewareError {
    fn from(err: SendError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<HandlerError> for MiddlewareError {
    fn from(err: HandlerError) -> Self {
        Self::new(err.message)
    }
}

impl From<DispatchError> for MiddlewareError {
    fn from(err: DispatchError) -> Self {
        Self::new(err.to_string())
    }
}

/// A plugin lifecycle hook failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Plugin '{plugin}' failed: {message}")]
pub struct PluginError {
    /// Plugin name.
    pub plugin: String,
    /// Human-readable message.
    pub message: String,
}

impl PluginError {
    /// Create a plugin error.
    #[must_use]
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}
