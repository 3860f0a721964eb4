//! WebSocket implementation of the `Connection` capability.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use switchboard_core::{Connection, ConnectionId, Metadata, SendError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// A connected WebSocket client as seen by the dispatcher.
///
/// `send` enqueues onto a bounded channel drained by the session's writer
/// task; a full queue is reported as backpressure instead of blocking.
pub struct WsConnection {
    id: ConnectionId,
    metadata: Metadata,
    tx: mpsc::Sender<Bytes>,
    closed: CancellationToken,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
}

impl WsConnection {
    /// Create a connection with a fresh UUID v7 identity.
    ///
    /// Returns the receiving end of the outbound queue for the writer task.
    pub fn new(metadata: Metadata, queue_size: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        Self::with_id(ConnectionId::new(), metadata, queue_size)
    }

    /// Create a connection with a given identity.
    pub fn with_id(
        id: ConnectionId,
        metadata: Metadata,
        queue_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let now = Instant::now();
        let conn = Arc::new(Self {
            id,
            metadata,
            tx,
            closed: CancellationToken::new(),
            connected_at: now,
            last_seen: Mutex::new(now),
        });
        (conn, rx)
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Token cancelled when the connection is closed.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Connection for WsConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: Bytes) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed {
                connection_id: self.id.clone(),
            });
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Backpressure {
                connection_id: self.id.clone(),
            },
            TrySendError::Closed(_) => SendError::Closed {
                connection_id: self.id.clone(),
            },
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}
