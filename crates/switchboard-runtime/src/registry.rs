//! Connection registry and two-sided subscription index.
//!
//! All state lives behind one lock, so every mutation updates the
//! connection table and both index sides together. Readers get snapshots;
//! sends and event emission happen after the lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use switchboard_core::{ConnectionId, ConnectionRef, DuplicateConnection, SendError};
use switchboard_events::{EventBus, EventPayload, names};
use tracing::{debug, warn};

use crate::metrics::BROADCAST_SEND_FAILURES_TOTAL;

#[derive(Default)]
struct Index {
    connections: HashMap<ConnectionId, ConnectionRef>,
    topics_by_connection: HashMap<ConnectionId, HashSet<String>>,
    connections_by_topic: HashMap<String, HashSet<ConnectionId>>,
}

impl Index {
    fn holds(&self, conn: &ConnectionRef) -> bool {
        self.connections
            .get(conn.id())
            .is_some_and(|stored| same_connection(stored, conn))
    }

    fn unlink(&mut self, id: &ConnectionId, topic: &str) {
        if let Some(members) = self.connections_by_topic.get_mut(topic) {
            let _ = members.remove(id);
            if members.is_empty() {
                let _ = self.connections_by_topic.remove(topic);
            }
        }
    }
}

/// Identity by allocation, not by id: a rejected duplicate shares the id.
fn same_connection(a: &ConnectionRef, b: &ConnectionRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Outcome of [`ConnectionRegistry::broadcast_to_topic`].
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Recipients that accepted the frame.
    pub delivered: usize,
    /// One entry per recipient whose send failed.
    pub failures: Vec<SendError>,
}

impl BroadcastReport {
    /// Number of recipients the broadcast was attempted on.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

/// Live connections and their topic subscriptions.
pub struct ConnectionRegistry {
    index: Mutex<Index>,
    events: Option<Arc<EventBus>>,
}

impl ConnectionRegistry {
    /// Registry without lifecycle notifications.
    pub fn new() -> Self {
        Self {
            index: Mutex::new(Index::default()),
            events: None,
        }
    }

    /// Registry that emits `connection.*` and `message.sent` on `events`.
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            index: Mutex::new(Index::default()),
            events: Some(events),
        }
    }

    /// Register a connection by identity.
    pub fn add(&self, conn: &ConnectionRef) -> Result<(), DuplicateConnection> {
        {
            let mut index = self.index.lock();
            if index.connections.contains_key(conn.id()) {
                return Err(DuplicateConnection {
                    connection_id: conn.id().clone(),
                });
            }
            let _ = index.connections.insert(conn.id().clone(), conn.clone());
        }
        debug!(conn_id = %conn.id(), "connection registered");
        self.emit(names::CONNECTION_ADDED, || {
            EventPayload::Connection(conn.clone())
        });
        Ok(())
    }

    /// Remove a connection and every subscription it holds.
    ///
    /// Returns `false` if this connection was not registered (double close is
    /// safe). A different connection registered under the same id is left
    /// untouched.
    pub fn remove(&self, conn: &ConnectionRef) -> bool {
        let removed = {
            let mut index = self.index.lock();
            if index.holds(conn) {
                let id = conn.id();
                let _ = index.connections.remove(id);
                if let Some(topics) = index.topics_by_connection.remove(id) {
                    for topic in &topics {
                        index.unlink(id, topic);
                    }
                }
                true
            } else {
                false
            }
        };
        if removed {
            debug!(conn_id = %conn.id(), "connection removed");
            self.emit(names::CONNECTION_REMOVED, || {
                EventPayload::Connection(conn.clone())
            });
        }
        removed
    }

    /// Subscribe a registered connection to `topic`.
    ///
    /// Returns `true` if the subscription is new. Repeat calls and calls for
    /// an unregistered connection change nothing and return `false`.
    pub fn subscribe(&self, conn: &ConnectionRef, topic: &str) -> bool {
        let added = {
            let mut index = self.index.lock();
            let id = conn.id();
            if index.holds(conn) {
                let inserted = index
                    .topics_by_connection
                    .entry(id.clone())
                    .or_default()
                    .insert(topic.to_owned());
                if inserted {
                    let _ = index
                        .connections_by_topic
                        .entry(topic.to_owned())
                        .or_default()
                        .insert(id.clone());
                }
                inserted
            } else {
                debug!(conn_id = %id, topic, "subscribe ignored for unregistered connection");
                false
            }
        };
        if added {
            debug!(conn_id = %conn.id(), topic, "subscribed");
            self.emit(names::CONNECTION_SUBSCRIBED, || EventPayload::Subscription {
                connection: conn.clone(),
                topic: topic.to_owned(),
            });
        }
        added
    }

    /// Unsubscribe `conn` from `topic`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, conn: &ConnectionRef, topic: &str) -> bool {
        let removed = {
            let mut index = self.index.lock();
            let id = conn.id();
            let owned = index.holds(conn);
            let removed = match index.topics_by_connection.get_mut(id) {
                Some(topics) if owned => {
                    let removed = topics.remove(topic);
                    if topics.is_empty() {
                        let _ = index.topics_by_connection.remove(id);
                    }
                    removed
                }
                _ => false,
            };
            if removed {
                index.unlink(id, topic);
            }
            removed
        };
        if removed {
            debug!(conn_id = %conn.id(), topic, "unsubscribed");
            self.emit(names::CONNECTION_UNSUBSCRIBED, || EventPayload::Subscription {
                connection: conn.clone(),
                topic: topic.to_owned(),
            });
        }
        removed
    }

    /// Whether this exact connection is registered.
    pub fn contains(&self, conn: &ConnectionRef) -> bool {
        self.index.lock().holds(conn)
    }

    /// Whether `conn` is subscribed to `topic`.
    pub fn is_subscribed(&self, conn: &ConnectionRef, topic: &str) -> bool {
        self.index
            .lock()
            .topics_by_connection
            .get(conn.id())
            .is_some_and(|topics| topics.contains(topic))
    }

    /// Snapshot of the current subscribers of `topic`.
    pub fn subscribers_of(&self, topic: &str) -> Vec<ConnectionRef> {
        let index = self.index.lock();
        index
            .connections_by_topic
            .get(topic)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| index.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Send `payload` to every current subscriber of `topic`.
    ///
    /// Recipients are snapshotted under the lock and sent to outside it. A
    /// failing recipient is logged and reported; delivery to the rest continues.
    pub fn broadcast_to_topic(&self, topic: &str, payload: Bytes) -> BroadcastReport {
        let recipients = self.subscribers_of(topic);
        let mut report = BroadcastReport::default();

        for conn in &recipients {
            match conn.send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(conn_id = %conn.id(), topic, error = %e, "broadcast send failed");
                    metrics::counter!(BROADCAST_SEND_FAILURES_TOTAL).increment(1);
                    report.failures.push(e);
                }
            }
        }

        debug!(
            topic,
            delivered = report.delivered,
            failed = report.failures.len(),
            "broadcast complete"
        );
        self.emit(names::MESSAGE_SENT, || EventPayload::MessageSent {
            topic: topic.to_owned(),
            payload: payload.clone(),
            delivered: report.delivered,
            failed: report.failures.len(),
        });
        report
    }

    /// Snapshot of every registered connection.
    pub fn all(&self) -> Vec<ConnectionRef> {
        self.index.lock().connections.values().cloned().collect()
    }

    /// Look up a connection by identity.
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionRef> {
        self.index.lock().connections.get(id).cloned()
    }

    /// Topics `id` is subscribed to, sorted.
    pub fn topics_of(&self, id: &ConnectionId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .index
            .lock()
            .topics_by_connection
            .get(id)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.index.lock().connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.index.lock().connections.is_empty()
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.index.lock().connections_by_topic.len()
    }

    fn emit(&self, event: &str, payload: impl FnOnce() -> EventPayload) {
        // Registry state is already updated; a listener error cannot undo it.
        if let Some(bus) = self.events.as_ref().filter(|b| b.has_listeners(event)) {
            bus.emit(event, &payload());
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let index = self.index.lock();
        for (id, topics) in &index.topics_by_connection {
            assert!(index.connections.contains_key(id), "{id} subscribed but unregistered");
            assert!(!topics.is_empty(), "{id} has an empty topic set");
            for topic in topics {
                assert!(
                    index
                        .connections_by_topic
                        .get(topic)
                        .is_some_and(|m| m.contains(id)),
                    "{id} -> {topic} missing from topic side"
                );
            }
        }
        for (topic, members) in &index.connections_by_topic {
            assert!(!members.is_empty(), "{topic} has an empty member set");
            for id in members {
                assert!(
                    index
                        .topics_by_connection
                        .get(id)
                        .is_some_and(|t| t.contains(topic)),
                    "{topic} -> {id} missing from connection side"
                );
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.lock();
        f.debug_struct("ConnectionRegistry")
            .field("connections", &index.connections.len())
            .field("topics", &index.connections_by_topic.len())
            .finish_non_exhaustive()
    }
}
