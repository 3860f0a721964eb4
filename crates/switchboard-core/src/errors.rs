//! Dispatch error taxonomy.
//!
//! Each failure kind is its own type so components can return exactly what
//! they can produce, and [`DispatchError`] groups them for the dispatcher:
//!
//! - [`DuplicateConnection`]: registry invariant violation, fatal to `add`
//! - [`RoutingError`]: no/invalid route, the connection stays open
//! - [`ConfigurationError`]: wiring defect (unknown handler or middleware)
//! - [`MalformedMessageError`]: undecodable inbound frame
//! - [`SendError`]: per-recipient delivery failure
//! - [`ConnectionRejected`]: an open hook or listener refused the connection
//! - [`HandlerError`]: a route handler failed

use thiserror::Error;

use crate::ids::ConnectionId;

/// A connection with the same identity is already registered.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Connection {connection_id} is already registered")]
pub struct DuplicateConnection {
    /// The conflicting identity.
    pub connection_id: ConnectionId,
}

/// Route resolution failed for an inbound packet.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No route pattern matched.
    #[error("Invalid route: {route}")]
    NoMatch {
        /// The route string from the packet.
        route: String,
    },

    /// A route matched but declares no handler.
    #[error("Route '{route}' has no handler")]
    MissingHandler {
        /// The matched route name.
        route: String,
    },
}

impl RoutingError {
    /// The route string or name the error refers to.
    #[must_use]
    pub fn route(&self) -> &str {
        match self {
            Self::NoMatch { route } | Self::MissingHandler { route } => route,
        }
    }
}

/// Wiring or deployment defect, not a client input defect.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A handler reference does not resolve to a registered handler.
    #[error("Unknown handler '{handler}'")]
    UnknownHandler {
        /// The unresolved handler reference.
        handler: String,
    },

    /// A middleware reference does not resolve to a registered middleware.
    #[error("Unknown middleware '{middleware}'")]
    UnknownMiddleware {
        /// The unresolved middleware reference.
        middleware: String,
    },

    /// A route definition is invalid.
    #[error("Invalid route definition '{route}': {reason}")]
    InvalidRoute {
        /// Route name.
        route: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The route table could not be loaded.
    #[error("Failed to load routes: {0}")]
    Load(String),
}

/// Inbound frame could not be decoded into a [`Packet`](crate::Packet).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MalformedMessageError {
    /// The frame is not valid UTF-8.
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    /// The frame is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The frame is JSON but not an object.
    #[error("Invalid message format: expected a JSON object")]
    NotAnObject,

    /// A required key is absent.
    #[error("Invalid message format: missing '{0}'")]
    MissingField(&'static str),

    /// The `route` key is not a string.
    #[error("Invalid message format: 'route' must be a string")]
    RouteNotString,
}

/// Delivery to a single connection failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection is closed or its writer has gone away.
    #[error("Connection {connection_id} is closed")]
    Closed {
        /// Recipient identity.
        connection_id: ConnectionId,
    },

    /// The outbound queue is full.
    #[error("Outbound queue full for connection {connection_id}")]
    Backpressure {
        /// Recipient identity.
        connection_id: ConnectionId,
    },

    /// Transport-specific failure.
    #[error("Send to {connection_id} failed: {message}")]
    Transport {
        /// Recipient identity.
        connection_id: ConnectionId,
        /// Transport message.
        message: String,
    },
}

impl SendError {
    /// Identity of the recipient that failed.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::Closed { connection_id }
            | Self::Backpressure { connection_id }
            | Self::Transport { connection_id, .. } => connection_id,
        }
    }
}

/// A connection was refused at open time.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Connection rejected: {reason}")]
pub struct ConnectionRejected {
    /// Why the connection was refused.
    pub reason: String,
}

impl ConnectionRejected {
    /// Create a rejection with a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A route handler failed while processing a packet.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Handler error: {message}")]
pub struct HandlerError {
    /// Human-readable message.
    pub message: String,
}

impl HandlerError {
    /// Create a handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<SendError> for HandlerError {
    fn from(err: SendError) -> Self {
        Self::new(err.to_string())
    }
}

/// Any failure the dispatcher can surface for a lifecycle event or message.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Registry identity conflict.
    #[error("{0}")]
    Duplicate(#[from] DuplicateConnection),

    /// Route resolution failure.
    #[error("{0}")]
    Routing(#[from] RoutingError),

    /// Wiring defect.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Undecodable frame.
    #[error("{0}")]
    Malformed(#[from] MalformedMessageError),

    /// Delivery failure.
    #[error("{0}")]
    Send(#[from] SendError),

    /// Connection refused at open.
    #[error("{0}")]
    Rejected(#[from] ConnectionRejected),

    /// Route handler failure.
    #[error("{0}")]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Duplicate(_) => "DUPLICATE_CONNECTION",
            Self::Routing(_) => "ROUTING_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Malformed(_) => "MALFORMED_MESSAGE",
            Self::Send(_) => "SEND_ERROR",
            Self::Rejected(_) => "CONNECTION_REJECTED",
            Self::Handler(_) => "HANDLER_ERROR",
        }
    }

    /// Whether the connection must be closed because of this error.
    ///
    /// Only identity conflicts and open-time rejections close a connection.
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Duplicate(_) | Self::Rejected(_))
    }

    /// Client-facing error frame: `{"error":{"code":..,"message":..}}`.
    #[must_use]
    pub fn to_frame(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}
