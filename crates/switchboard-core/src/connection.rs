//! The connection capability the transport provides.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::errors::SendError;
use crate::ids::ConnectionId;

/// Opaque per-connection metadata (auth tokens, query parameters, ...).
pub type Metadata = Map<String, Value>;

/// A live bidirectional connection owned by the transport.
///
/// The core only holds shared references keyed by [`Connection::id`].
/// `send` must not block on network I/O: implementations enqueue and return.
pub trait Connection: Send + Sync {
    /// Stable identity for the lifetime of the connection.
    fn id(&self) -> &ConnectionId;

    /// Enqueue a frame for delivery.
    fn send(&self, frame: Bytes) -> Result<(), SendError>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Whether [`close`](Connection::close) has been called or the peer went away.
    fn is_closed(&self) -> bool;

    /// Snapshot of the connection metadata.
    fn metadata(&self) -> Metadata;

    /// Serialize a JSON value and send it.
    fn send_json(&self, value: &Value) -> Result<(), SendError> {
        self.send(Bytes::from(value.to_string()))
    }

    /// Send a UTF-8 text frame.
    fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.send(Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// Shared handle to a connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// In-process connection that records every frame it is sent.
///
/// Used for embedding the dispatcher without a network transport and in
/// tests. It can be configured to fail every `send`.
pub struct MemoryConnection {
    id: ConnectionId,
    metadata: Metadata,
    frames: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl MemoryConnection {
    /// Create a connection with the given identity and no metadata.
    pub fn new(id: impl Into<ConnectionId>) -> Self {
        Self::with_metadata(id, Metadata::new())
    }

    /// Create a connection carrying metadata.
    pub fn with_metadata(id: impl Into<ConnectionId>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            metadata,
            frames: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            failing: AtomicBool::new(false),
        }
    }

    /// Create a shared handle.
    pub fn shared(id: impl Into<ConnectionId>) -> Arc<Self> {
        Arc::new(Self::new(id))
    }

    /// Make every subsequent `send` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Every frame sent so far.
    pub fn sent(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    /// Every frame sent so far, decoded lossily as text.
    pub fn sent_text(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: Bytes) -> Result<(), SendError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(SendError::Closed {
                connection_id: self.id.clone(),
            });
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(SendError::Transport {
                connection_id: self.id.clone(),
                message: "send failure".into(),
            });
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }
}
