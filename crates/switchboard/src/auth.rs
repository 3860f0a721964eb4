//! Shared-token authentication for the chat demo.
//!
//! The token is checked twice: on the upgrade request's query string when
//! the connection opens, and on every packet's metadata.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::{ConnectionRef, Packet};
use switchboard_events::{EventBus, EventPayload, Listener, ListenerError, listener, names};
use switchboard_runtime::{BootContext, Middleware, MiddlewareError, Next, Plugin, PluginError};
use tracing::warn;

const INVALID_TOKEN: &str = "Invalid token";

/// Per-message token check.
pub struct TokenAuth {
    token: String,
    key_name: String,
}

impl TokenAuth {
    /// Accept `token` under the metadata key `key_name`.
    pub fn new(token: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            key_name: key_name.into(),
        }
    }

    fn is_valid(&self, candidate: Option<&Value>) -> bool {
        matches!(candidate, Some(Value::String(s)) if !s.is_empty() && *s == self.token)
    }
}

#[async_trait]
impl Middleware for TokenAuth {
    fn name(&self) -> &str {
        "auth"
    }

    async fn handle(
        &self,
        conn: &ConnectionRef,
        packet: &mut Packet,
        next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        if !self.is_valid(packet.metadata(&self.key_name)) {
            warn!(conn_id = %conn.id(), route = packet.route(), "invalid token, closing");
            let _ = conn.send_text(INVALID_TOKEN);
            conn.close();
            return Ok(());
        }
        next.run(conn.clone(), packet).await;
        Ok(())
    }
}

/// Rejects connections without the token and installs [`TokenAuth`].
pub struct AuthPlugin {
    auth: Arc<TokenAuth>,
    on_open: Mutex<Option<Listener>>,
}

impl AuthPlugin {
    /// Accept `token` under `key_name` in query parameters and packet metadata.
    pub fn new(token: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            auth: Arc::new(TokenAuth::new(token, key_name)),
            on_open: Mutex::new(None),
        }
    }
}

impl Plugin for AuthPlugin {
    fn name(&self) -> &str {
        "auth"
    }

    fn register(&self, bus: &EventBus) -> Result<(), PluginError> {
        let auth = self.auth.clone();
        let check = listener(move |payload| {
            let EventPayload::Connection(conn) = payload else {
                return Ok(());
            };
            if auth.is_valid(conn.metadata().get(&auth.key_name)) {
                return Ok(());
            }
            warn!(conn_id = %conn.id(), "invalid token at handshake");
            let _ = conn.send_text(INVALID_TOKEN);
            Err(ListenerError::new(INVALID_TOKEN))
        });
        bus.add_listener(names::CONNECTION_OPENED, check.clone());
        *self.on_open.lock() = Some(check);
        Ok(())
    }

    fn boot(&self, ctx: &mut BootContext<'_>) -> Result<(), PluginError> {
        ctx.add_global_middleware(self.auth.clone());
        Ok(())
    }

    fn unregister(&self, bus: &EventBus) {
        if let Some(check) = self.on_open.lock().take() {
            let _ = bus.remove_listener(names::CONNECTION_OPENED, &check);
        }
    }
}
