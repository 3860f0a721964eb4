//! Graceful shutdown coordination via `CancellationToken`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Signals shutdown and tracks session tasks so they can be drained.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a tracked session task.
    pub fn spawn_session<F>(&self, session: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.sessions.spawn(session);
    }

    /// Number of live session tasks.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancel the token and wait up to `timeout` for every session task.
    ///
    /// Returns `false` if sessions were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.sessions.close();
        info!(
            sessions = self.sessions.len(),
            timeout_secs = timeout.as_secs(),
            "draining sessions"
        );
        if tokio::time::timeout(timeout, self.sessions.wait()).await.is_err() {
            warn!(
                remaining = self.sessions.len(),
                "shutdown timed out after {timeout:?}, sessions still running"
            );
            return false;
        }
        true
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("shutting_down", &self.is_shutting_down())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.active_sessions(), 0);
    }

    #[test]
    fn token_propagation_and_idempotence() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn drain_waits_for_sessions() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.spawn_session(async move {
            token.cancelled().await;
        });
        assert_eq!(coord.active_sessions(), 1);
        assert!(coord.drain(Duration::from_secs(5)).await);
        assert_eq!(coord.active_sessions(), 0);
    }

    #[tokio::test]
    async fn drain_times_out() {
        let coord = ShutdownCoordinator::new();
        coord.spawn_session(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        assert!(!coord.drain(Duration::from_millis(50)).await);
        assert!(coord.is_shutting_down());
    }
}
