//! Accept loop and session spawning

use super::shutdown::{drain_sessions, StopReport};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::Registry;
use crate::session::{SessionConfig, SessionGuard, SessionInfo, SessionManager, StationSession};
use crate::stats::{ServerStats, StatsSnapshot};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// State shared between the accept loop and the handle
struct DispatchContext {
    registry: Arc<Registry>,
    stats: Arc<ServerStats>,
    sessions: Arc<SessionManager>,
    permits: Arc<Semaphore>,
    max_sessions: usize,
    session_config: SessionConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Accepts station connections and runs a session for each
pub struct Dispatcher {
    config: ServerConfig,
    registry: Arc<Registry>,
    stats: Arc<ServerStats>,
}

impl Dispatcher {
    /// Create a dispatcher that stores readings into `registry`
    pub fn new(config: ServerConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            stats: Arc::new(ServerStats::new()),
        }
    }

    /// Bind the listener and start accepting connections
    ///
    /// A bind failure is fatal and returned to the caller; everything after
    /// this point is contained per session.
    pub async fn start(self) -> Result<DispatcherHandle, ServerError> {
        self.config.validate()?;

        let bind_err = |source| ServerError::Bind {
            addr: self.config.bind_addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(
            "Listening for stations on {} (max {} sessions)",
            local_addr, self.config.max_sessions
        );

        let ctx = Arc::new(DispatchContext {
            registry: self.registry,
            stats: self.stats,
            sessions: Arc::new(SessionManager::new()),
            permits: Arc::new(Semaphore::new(self.config.max_sessions)),
            max_sessions: self.config.max_sessions,
            session_config: self.config.session_config(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&ctx)));

        Ok(DispatcherHandle {
            local_addr,
            grace_period: self.config.grace_period,
            ctx,
            accept_task,
        })
    }
}

/// Handle to a running dispatcher
pub struct DispatcherHandle {
    local_addr: SocketAddr,
    grace_period: Duration,
    ctx: Arc<DispatchContext>,
    accept_task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The registry sessions write into
    pub fn registry(&self) -> &Arc<Registry> {
        &self.ctx.registry
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// The live session set
    pub fn session_manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.ctx.sessions)
    }

    /// Current counter values
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Number of sessions currently running
    pub fn active_sessions(&self) -> usize {
        self.ctx.sessions.count()
    }

    /// Stations with a live, identified session
    pub fn connected_stations(&self) -> Vec<String> {
        self.ctx.sessions.connected_stations()
    }

    /// Details of every live session
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.ctx.sessions.sessions()
    }

    /// Token cancelled when the dispatcher stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    /// Stop accepting, let sessions drain, abort whatever remains
    pub async fn stop(self) -> StopReport {
        info!("Stopping dispatcher on {}", self.local_addr);
        // Counted before the signal; cooperative sessions start leaving at once
        let live = self.ctx.sessions.count();
        self.ctx.shutdown.cancel();

        if let Err(e) = self.accept_task.await {
            error!("Accept loop ended abnormally: {}", e);
        }

        let report = drain_sessions(
            &self.ctx.sessions,
            &self.ctx.tracker,
            live,
            self.grace_period,
        )
        .await;
        info!(
            drained = report.drained,
            aborted = report.aborted,
            "Dispatcher stopped"
        );
        report
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<DispatchContext>) {
    loop {
        let (stream, addr) = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };

        match Arc::clone(&ctx.permits).try_acquire_owned() {
            Ok(permit) => spawn_session(&ctx, stream, addr, permit),
            Err(_) => {
                ctx.stats.connection_rejected();
                warn!(
                    peer = %addr,
                    "Session limit ({}) reached, closing connection",
                    ctx.max_sessions
                );
                drop(stream);
            }
        }
    }

    debug!("Accept loop stopped");
}

fn spawn_session(
    ctx: &Arc<DispatchContext>,
    stream: TcpStream,
    addr: SocketAddr,
    permit: OwnedSemaphorePermit,
) {
    let id = ctx.sessions.next_id();
    ctx.sessions.register(id, addr);
    ctx.stats.connection_accepted();
    info!(session = id, peer = %addr, "Station connected");

    let session = StationSession::new(
        id,
        addr,
        stream,
        ctx.session_config.clone(),
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.stats),
        Arc::clone(&ctx.sessions),
    );
    let guard = SessionGuard::new(id, Arc::clone(&ctx.sessions), Arc::clone(&ctx.stats));
    let shutdown = ctx.shutdown.child_token();

    let handle = ctx.tracker.spawn(async move {
        let _permit = permit;
        let _guard = guard;
        session.run(shutdown).await
    });
    ctx.sessions.attach_abort(id, handle.abort_handle());
}
