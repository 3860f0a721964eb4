//! Middleware shipped with the runtime.

use async_trait::async_trait;
use switchboard_core::{ConnectionRef, Packet};
use tracing::debug;

use crate::errors::MiddlewareError;
use crate::pipeline::middleware::{Middleware, Next};

/// Logs each packet at debug level and forwards it unchanged.
#[derive(Debug, Default)]
pub struct TraceMiddleware;

#[async_trait]
impl Middleware for TraceMiddleware {
    fn name(&self) -> &str {
        "trace"
    }

    async fn handle(
        &self,
        conn: &ConnectionRef,
        packet: &mut Packet,
        next: Next<'_>,
    ) -> Result<(), MiddlewareError> {
        debug!(
            conn_id = %conn.id(),
            route = packet.route(),
            metadata_keys = packet.metadata_map().len(),
            "packet"
        );
        next.run(conn.clone(), packet).await;
        Ok(())
    }
}
