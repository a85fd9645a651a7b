//! Session manager for tracking all connected stations

use crate::stats::ServerStats;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;

/// Identifier of one accepted connection
pub type SessionId = u64;

/// Bookkeeping about a live session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub addr: SocketAddr,
    /// Set once the session has seen its first valid reading
    pub station_id: Option<String>,
    pub connected_at: Instant,
}

struct SessionEntry {
    info: SessionInfo,
    abort: Option<AbortHandle>,
}

/// The active session set
///
/// Entries are added when a connection is accepted and removed when its
/// session task ends, however it ends.
pub struct SessionManager {
    /// Map of session id -> session entry
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Allocate the next session id
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register a newly accepted connection
    pub fn register(&self, id: SessionId, addr: SocketAddr) {
        let info = SessionInfo {
            id,
            addr,
            station_id: None,
            connected_at: Instant::now(),
        };
        self.sessions
            .write()
            .insert(id, SessionEntry { info, abort: None });
    }

    /// Attach the task handle used to force-close the session
    ///
    /// No-op if the session already finished.
    pub fn attach_abort(&self, id: SessionId, abort: AbortHandle) {
        if let Some(entry) = self.sessions.write().get_mut(&id) {
            entry.abort = Some(abort);
        }
    }

    /// Record the station a session belongs to
    pub fn identify(&self, id: SessionId, station_id: &str) {
        if let Some(entry) = self.sessions.write().get_mut(&id) {
            entry.info.station_id = Some(station_id.to_string());
        }
    }

    /// Unregister a session
    pub fn unregister(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.write().remove(&id).map(|e| e.info)
    }

    /// Get info about a specific session
    pub fn get_info(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.read().get(&id).map(|e| e.info.clone())
    }

    /// Get all live sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().values().map(|e| e.info.clone()).collect()
    }

    /// Get list of identified stations currently connected
    pub fn connected_stations(&self) -> Vec<String> {
        let mut stations: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter_map(|e| e.info.station_id.clone())
            .collect();
        stations.sort();
        stations
    }

    /// Force-close every live session, returning how many were signalled
    pub fn abort_all(&self) -> usize {
        let sessions = self.sessions.read();
        let mut aborted = 0;
        for entry in sessions.values() {
            if let Some(abort) = &entry.abort {
                abort.abort();
                aborted += 1;
            }
        }
        aborted
    }

    /// Get the number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a session from the active set when dropped
///
/// Held by the session task so that deregistration also happens when the
/// task is aborted.
pub struct SessionGuard {
    id: SessionId,
    sessions: Arc<SessionManager>,
    stats: Arc<ServerStats>,
}

impl SessionGuard {
    pub fn new(id: SessionId, sessions: Arc<SessionManager>, stats: Arc<ServerStats>) -> Self {
        Self {
            id,
            sessions,
            stats,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.stats.session_closed();
        self.sessions.unregister(self.id);
    }
}
