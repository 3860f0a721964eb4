//! Branded ID newtypes.
//!
//! Identities are newtype wrappers around `String` so a connection ID cannot
//! be confused with a topic or route string. New IDs are UUID v7
//! (time-ordered), which also makes `Ord` follow creation order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Process-unique identity of a live connection, stable for its lifetime.
    ConnectionId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn new_ids_are_time_ordered() {
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        assert!(first < second);
    }

    #[test]
    fn from_str_preserves_value() {
        let id = ConnectionId::from("conn_1");
        assert_eq!(id.as_str(), "conn_1");
        assert_eq!(id.to_string(), "conn_1");
    }

    #[test]
    fn serializes_transparently() {
        let id = ConnectionId::from("conn_42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conn_42\"");
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deref_to_str() {
        let id = ConnectionId::from("abc");
        assert!(id.starts_with("ab"));
        let s: String = id.into();
        assert_eq!(s, "abc");
    }
}
