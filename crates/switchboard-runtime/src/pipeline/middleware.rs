//! Middleware and terminal capabilities.

use async_trait::async_trait;
use switchboard_core::{ConnectionRef, DispatchError, Packet};

use crate::errors::MiddlewareError;
use crate::pipeline::chain::Chain;

/// A step in the dispatch chain.
///
/// A middleware either forwards by calling [`Next::run`] exactly once, or
/// short-circuits by returning without calling it (typically after
/// answering the connection directly). `Next` is consumed by `run`, so it
/// cannot be advanced twice.
///
/// The packet is borrowed for the whole step, so metadata added before
/// forwarding is visible downstream. Returning an error does not stop the
/// chain: the failure is logged and, if `next` was never called, the chain
/// continues with the packet as this middleware left it.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs, metrics labels, and pipeline reports.
    fn name(&self) -> &str;

    /// Process `packet` and optionally forward it.
    async fn handle(
        &self,
        conn: &ConnectionRef,
        packet: &mut Packet,
        next: Next<'_>,
    ) -> Result<(), MiddlewareError>;
}

/// The end of a chain: reached once every middleware has forwarded.
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Handle the fully processed packet.
    async fn call(&self, conn: &ConnectionRef, packet: &Packet) -> Result<(), DispatchError>;
}

/// Continuation handed to a middleware.
pub struct Next<'a> {
    pub(crate) chain: &'a Chain<'a>,
    pub(crate) index: usize,
}

impl Next<'_> {
    /// Continue with the next middleware, or the terminal if none remain.
    ///
    /// Resolves once everything downstream has finished.
    pub async fn run(self, conn: ConnectionRef, packet: &mut Packet) {
        self.chain.mark_advanced(self.index);
        self.chain.run_from(self.index + 1, conn, packet).await;
    }

    /// Position of the middleware holding this continuation.
    pub fn position(&self) -> usize {
        self.index
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish()
    }
}
