//! Chat rooms: join, leave, and publish to a room topic.

use std::sync::Arc;

use async_trait::async_trait;
use switchboard_core::{ConnectionRef, HandlerError, Packet};
use switchboard_runtime::{ConnectionRegistry, ROUTE_PARAM, RouteHandler, RouteParams};
use tracing::{debug, info};

/// Handler id the default routes refer to.
pub const CHAT_HANDLER: &str = "ChatHandler";

/// Routes a room operation by the matched route name.
pub struct ChatHandler {
    registry: Arc<ConnectionRegistry>,
}

impl ChatHandler {
    /// Rooms are topics in `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    fn join(&self, conn: &ConnectionRef, room: &str) -> Result<(), HandlerError> {
        if !self.registry.subscribe(conn, room) {
            conn.send_text("You are already in the room")?;
            return Ok(());
        }
        info!(conn_id = %conn.id(), room, "joined room");
        Ok(())
    }

    fn leave(&self, conn: &ConnectionRef, room: &str) -> Result<(), HandlerError> {
        if !self.registry.unsubscribe(conn, room) {
            conn.send_text("You are not in the room")?;
            return Ok(());
        }
        info!(conn_id = %conn.id(), room, "left room");
        Ok(())
    }

    fn publish(&self, conn: &ConnectionRef, room: &str, packet: &Packet) -> Result<(), HandlerError> {
        if !self.registry.is_subscribed(conn, room) {
            conn.send_text("You are not in the room")?;
            return Ok(());
        }
        let report = self.registry.broadcast_to_topic(room, packet.payload_bytes());
        debug!(
            conn_id = %conn.id(),
            room,
            delivered = report.delivered,
            failed = report.failures.len(),
            "published to room"
        );
        Ok(())
    }
}

#[async_trait]
impl RouteHandler for ChatHandler {
    async fn handle(
        &self,
        conn: &ConnectionRef,
        packet: &Packet,
        params: &RouteParams,
    ) -> Result<(), HandlerError> {
        let room = params
            .get("roomId")
            .ok_or_else(|| HandlerError::new("route has no roomId parameter"))?;
        match params.get(ROUTE_PARAM).map(String::as_str) {
            Some("join_room") => self.join(conn, room),
            Some("leave_room") => self.leave(conn, room),
            Some("room_publish") => self.publish(conn, room, packet),
            other => Err(HandlerError::new(format!(
                "ChatHandler cannot handle route {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}
