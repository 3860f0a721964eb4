//! Lifecycle event names and payloads.

use std::fmt;

use bytes::Bytes;
use switchboard_core::ConnectionRef;

/// Well-known lifecycle event names.
pub mod names {
    /// A transport-level connection opened; emitted before registration.
    /// A listener error rejects the connection.
    pub const CONNECTION_OPENED: &str = "connection.opened";
    /// A connection entered the registry.
    pub const CONNECTION_ADDED: &str = "connection.added";
    /// A connection and all its subscriptions left the registry.
    pub const CONNECTION_REMOVED: &str = "connection.removed";
    /// A connection subscribed to a topic.
    pub const CONNECTION_SUBSCRIBED: &str = "connection.subscribed";
    /// A connection unsubscribed from a topic.
    pub const CONNECTION_UNSUBSCRIBED: &str = "connection.unsubscribed";
    /// A raw frame arrived, before decoding.
    pub const MESSAGE_RECEIVED: &str = "message.received";
    /// A topic broadcast completed (once per broadcast, not per recipient).
    pub const MESSAGE_SENT: &str = "message.sent";
    /// A plugin finished its register hook.
    pub const PLUGIN_REGISTERED: &str = "plugin.registered";

    /// Every built-in event name.
    pub const ALL: &[&str] = &[
        CONNECTION_OPENED,
        CONNECTION_ADDED,
        CONNECTION_REMOVED,
        CONNECTION_SUBSCRIBED,
        CONNECTION_UNSUBSCRIBED,
        MESSAGE_RECEIVED,
        MESSAGE_SENT,
        PLUGIN_REGISTERED,
    ];
}

/// Data carried by an event.
#[derive(Clone)]
pub enum EventPayload {
    /// Connection lifecycle (`connection.opened|added|removed`).
    Connection(ConnectionRef),

    /// Subscription change (`connection.subscribed|unsubscribed`).
    Subscription {
        /// Subscriber.
        connection: ConnectionRef,
        /// Topic key.
        topic: String,
    },

    /// Raw inbound frame (`message.received`).
    MessageReceived {
        /// Sender.
        connection: ConnectionRef,
        /// Undecoded frame.
        raw: Bytes,
    },

    /// Completed topic broadcast (`message.sent`).
    MessageSent {
        /// Topic key.
        topic: String,
        /// Frame that was broadcast.
        payload: Bytes,
        /// Recipients that accepted the frame.
        delivered: usize,
        /// Recipients whose send failed.
        failed: usize,
    },

    /// Plugin lifecycle (`plugin.registered`).
    Plugin {
        /// Plugin name.
        name: String,
    },

    /// Application-defined events.
    Custom(serde_json::Value),
}

impl EventPayload {
    /// Connection the event concerns, if any.
    pub fn connection(&self) -> Option<&ConnectionRef> {
        match self {
            Self::Connection(conn)
            | Self::Subscription {
                connection: conn, ..
            }
            | Self::MessageReceived {
                connection: conn, ..
            } => Some(conn),
            Self::MessageSent { .. } | Self::Plugin { .. } | Self::Custom(_) => None,
        }
    }

    /// Topic the event concerns, if any.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Subscription { topic, .. } | Self::MessageSent { topic, .. } => Some(topic),
            _ => None,
        }
    }
}

impl fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(conn) => f.debug_tuple("Connection").field(conn.id()).finish(),
            Self::Subscription { connection, topic } => f
                .debug_struct("Subscription")
                .field("connection", connection.id())
                .field("topic", topic)
                .finish(),
            Self::MessageReceived { connection, raw } => f
                .debug_struct("MessageReceived")
                .field("connection", connection.id())
                .field("len", &raw.len())
                .finish(),
            Self::MessageSent {
                topic,
                payload,
                delivered,
                failed,
            } => f
                .debug_struct("MessageSent")
                .field("topic", topic)
                .field("len", &payload.len())
                .field("delivered", delivered)
                .field("failed", failed)
                .finish(),
            Self::Plugin { name } => f.debug_struct("Plugin").field("name", name).finish(),
            Self::Custom(value) => f.debug_tuple("Custom").field(value).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::MemoryConnection;

    #[test]
    fn names_are_dotted_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for name in names::ALL {
            assert!(name.contains('.'), "{name} should be dotted");
            assert!(seen.insert(*name), "{name} listed twice");
        }
    }

    #[test]
    fn accessors() {
        let conn: ConnectionRef = MemoryConnection::shared("c1");
        let sub = EventPayload::Subscription {
            connection: conn.clone(),
            topic: "room1".into(),
        };
        assert_eq!(sub.connection().unwrap().id().as_str(), "c1");
        assert_eq!(sub.topic(), Some("room1"));

        let plugin = EventPayload::Plugin {
            name: "auth".into(),
        };
        assert!(plugin.connection().is_none());
        assert!(plugin.topic().is_none());
    }

    #[test]
    fn debug_shows_connection_id() {
        let conn: ConnectionRef = MemoryConnection::shared("c7");
        let text = format!("{:?}", EventPayload::Connection(conn));
        assert!(text.contains("c7"));
    }
}
