//! Bounded draining of live sessions

use crate::session::SessionManager;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Outcome of a dispatcher stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    /// Sessions that finished on their own within the grace period
    pub drained: usize,
    /// Sessions that had to be aborted
    pub aborted: usize,
}

/// Wait up to `grace` for session tasks to finish, then abort the rest
///
/// Sessions must already have been signalled to close; `live` is the
/// number that were running when the signal went out. Returns once every
/// session task has ended.
pub(super) async fn drain_sessions(
    sessions: &SessionManager,
    tracker: &TaskTracker,
    live: usize,
    grace: Duration,
) -> StopReport {
    tracker.close();

    if timeout(grace, tracker.wait()).await.is_ok() {
        return StopReport {
            drained: live,
            aborted: 0,
        };
    }

    let aborted = sessions.abort_all();
    warn!(
        "Grace period of {:?} elapsed, aborting {} session(s)",
        grace, aborted
    );
    tracker.wait().await;

    StopReport {
        drained: live.saturating_sub(aborted),
        aborted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionGuard;
    use crate::stats::ServerStats;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn spawn_tracked(
        tracker: &TaskTracker,
        sessions: &Arc<SessionManager>,
        token: Option<CancellationToken>,
    ) {
        let id = sessions.next_id();
        sessions.register(id, SocketAddr::from(([127, 0, 0, 1], 40000 + id as u16)));
        let guard = SessionGuard::new(id, Arc::clone(sessions), Arc::new(ServerStats::new()));
        let handle = tracker.spawn(async move {
            let _guard = guard;
            match token {
                Some(token) => token.cancelled().await,
                // Ignores shutdown entirely
                None => std::future::pending::<()>().await,
            }
        });
        sessions.attach_abort(id, handle.abort_handle());
    }

    #[tokio::test]
    async fn test_cooperative_sessions_drain() {
        let tracker = TaskTracker::new();
        let sessions = Arc::new(SessionManager::new());
        let token = CancellationToken::new();
        for _ in 0..3 {
            spawn_tracked(&tracker, &sessions, Some(token.child_token()));
        }

        let live = sessions.count();
        token.cancel();
        // Let the cancelled sessions finish before draining starts
        tokio::task::yield_now().await;
        let report = drain_sessions(&sessions, &tracker, live, Duration::from_secs(5)).await;

        assert_eq!(report, StopReport { drained: 3, aborted: 0 });
        assert_eq!(sessions.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_sessions_are_aborted() {
        let tracker = TaskTracker::new();
        let sessions = Arc::new(SessionManager::new());
        let token = CancellationToken::new();
        spawn_tracked(&tracker, &sessions, Some(token.child_token()));
        spawn_tracked(&tracker, &sessions, None);

        let live = sessions.count();
        token.cancel();
        let report = drain_sessions(&sessions, &tracker, live, Duration::from_secs(2)).await;

        assert_eq!(report, StopReport { drained: 1, aborted: 1 });
        assert_eq!(sessions.count(), 0);
    }
}
