//! Named-event publish/subscribe.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::errors::{EventError, ListenerError};
use crate::types::EventPayload;

/// A registered event callback. Identity is the `Arc` allocation, so keep a
/// clone of the handle to remove it later.
pub type Listener = Arc<dyn Fn(&EventPayload) -> Result<(), ListenerError> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&EventPayload) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Synchronous event bus with process-wide lifetime.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `event`.
    pub fn add_listener(&self, event: &str, listener: Listener) {
        self.listeners
            .write()
            .entry(event.to_owned())
            .or_default()
            .push(listener);
        debug!(event, "listener added");
    }

    /// Remove the first registration of `listener` for `event`.
    ///
    /// Returns `false` (and does nothing) if it was not registered.
    pub fn remove_listener(&self, event: &str, listener: &Listener) -> bool {
        let mut listeners = self.listeners.write();
        let Some(registered) = listeners.get_mut(event) else {
            return false;
        };
        let Some(pos) = registered.iter().position(|l| same_listener(l, listener)) else {
            return false;
        };
        let _ = registered.remove(pos);
        if registered.is_empty() {
            let _ = listeners.remove(event);
        }
        debug!(event, "listener removed");
        true
    }

    /// Invoke every listener registered for `event`, in registration order.
    ///
    /// The listener list is snapshotted first: listeners added or removed
    /// during the dispatch only affect later dispatches. The first listener
    /// error stops the dispatch and is returned.
    pub fn dispatch(&self, event: &str, payload: &EventPayload) -> Result<(), EventError> {
        let snapshot: Vec<Listener> = match self.listeners.read().get(event) {
            Some(listeners) => listeners.clone(),
            None => return Ok(()),
        };

        for listener in &snapshot {
            if let Err(source) = listener(payload) {
                warn!(event, error = %source, "event listener failed");
                return Err(EventError {
                    event: event.to_owned(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Dispatch and log a listener failure instead of returning it.
    ///
    /// For emitters whose own state change has already been applied.
    pub fn emit(&self, event: &str, payload: &EventPayload) {
        if let Err(e) = self.dispatch(event, payload) {
            warn!(event, error = %e, "event dispatch aborted by listener");
        }
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Whether any listener is registered for `event`.
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventBus")
            .field("events", &listeners.len())
            .field("listeners", &listeners.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
