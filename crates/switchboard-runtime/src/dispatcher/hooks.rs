//! Pre-registration connection hooks.

use async_trait::async_trait;
use switchboard_core::{ConnectionRef, ConnectionRejected};

/// Runs when a connection opens, before it enters the registry.
///
/// Rejecting closes the connection; it is never registered and receives no
/// dispatch. A hook may answer the peer itself before rejecting.
#[async_trait]
pub trait OpenHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Accept or reject `conn`.
    async fn on_open(&self, conn: &ConnectionRef) -> Result<(), ConnectionRejected>;
}
