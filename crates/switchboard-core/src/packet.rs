//! Decoded inbound frames.

use serde_json::{Map, Value};

use crate::errors::MalformedMessageError;

/// One inbound message: a logical route, a payload, and metadata.
///
/// Route and payload are fixed at construction. Metadata may gain keys while
/// middleware runs; additions made before forwarding to `next` are visible
/// downstream and to the handler.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    route: String,
    payload: Value,
    metadata: Map<String, Value>,
}

impl Packet {
    /// Create a packet.
    pub fn new(route: impl Into<String>, payload: Value, metadata: Map<String, Value>) -> Self {
        Self {
            route: route.into(),
            payload,
            metadata,
        }
    }

    /// Decode a frame of the form `{"route": "...", "msg": ..., ...}`.
    ///
    /// Every top-level key other than `route` and `msg` becomes metadata.
    pub fn from_json(raw: &[u8]) -> Result<Self, MalformedMessageError> {
        let text = std::str::from_utf8(raw).map_err(|_| MalformedMessageError::InvalidUtf8)?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| MalformedMessageError::InvalidJson(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(MalformedMessageError::NotAnObject);
        };

        let route = fields
            .remove("route")
            .ok_or(MalformedMessageError::MissingField("route"))?;
        let payload = fields
            .remove("msg")
            .ok_or(MalformedMessageError::MissingField("msg"))?;
        let Value::String(route) = route else {
            return Err(MalformedMessageError::RouteNotString);
        };

        Ok(Self {
            route,
            payload,
            metadata: fields,
        })
    }

    /// The logical route string.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The message payload (`msg`).
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Look up a single metadata value.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// All metadata.
    pub fn metadata_map(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Insert or replace a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        let _ = self.metadata.insert(key.into(), value);
    }

    /// Payload serialized for the wire: strings are sent as-is, anything
    /// else as JSON text.
    pub fn payload_bytes(&self) -> bytes::Bytes {
        match &self.payload {
            Value::String(s) => bytes::Bytes::from(s.clone()),
            other => bytes::Bytes::from(other.to_string()),
        }
    }
}
