//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use freemial_hub::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time allowed for sessions to drain.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// How often the registry is checked while draining.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared by the listener and every session task.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
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

    /// Cancel the token, then wait up to `timeout` for the serve task to
    /// stop and for every session to leave `registry`.
    ///
    /// Returns the number of sessions still registered when the wait ended
    /// (zero on a clean drain).
    pub async fn graceful_shutdown(
        &self,
        serve: JoinHandle<()>,
        registry: &Registry,
        timeout: Option<Duration>,
    ) -> usize {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            open_sessions = registry.connection_count(),
            groups = registry.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining sessions"
        );

        let drain = async {
            if let Err(e) = serve.await {
                warn!(error = %e, "serve task failed during shutdown");
            }
            while !registry.is_empty() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_ok() {
            info!("all sessions drained");
            return 0;
        }

        let open = registry.connection_count();
        warn!(
            open_sessions = open,
            groups = ?registry.list_group_ids(),
            "shutdown timed out with sessions still open"
        );
        open
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use freemial_hub::{Connection, Role};

    fn serve_task(coord: &ShutdownCoordinator) -> JoinHandle<()> {
        tokio::spawn(coord.token().cancelled_owned())
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::default();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_cancels_every_token_once() {
        let coord = ShutdownCoordinator::new();
        let tokens = [coord.token(), coord.token()];
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test]
    async fn empty_registry_drains_immediately() {
        let coord = ShutdownCoordinator::new();
        let registry = Registry::new();

        let open = coord.graceful_shutdown(serve_task(&coord), &registry, None).await;
        assert_eq!(open, 0);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_sessions_to_leave() {
        let coord = ShutdownCoordinator::new();
        let registry = Arc::new(Registry::new());
        let (conn, _rx) = Connection::new("dev-1", Role::Controller, 4);
        let group = registry.join(&conn);

        let token = coord.token();
        let _session = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            group.unregister(&conn);
        });

        let open = coord
            .graceful_shutdown(serve_task(&coord), &registry, Some(Duration::from_secs(5)))
            .await;
        assert_eq!(open, 0);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_sessions_still_open() {
        let coord = ShutdownCoordinator::new();
        let registry = Arc::new(Registry::new());
        let (a, _rx1) = Connection::new("dev-1", Role::Controller, 4);
        let (b, _rx2) = Connection::new("dev-2", Role::Peer, 4);
        let _ = registry.join(&a);
        let _ = registry.join(&b);

        let open = coord
            .graceful_shutdown(serve_task(&coord), &registry, Some(Duration::from_millis(100)))
            .await;
        assert_eq!(open, 2);
        assert!(coord.is_shutting_down());
    }
}
