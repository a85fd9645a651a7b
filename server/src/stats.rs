//! Connection and ingest counters
//!
//! Each counter is kept locally for queries and tests, and mirrored to the
//! `metrics` facade so an exporter can be attached by the embedding process.

use std::sync::atomic::{AtomicU64, Ordering};

/// Connections accepted into a session (counter).
pub const CONNECTIONS_ACCEPTED_TOTAL: &str = "weather_connections_accepted_total";
/// Connections refused because the session limit was reached (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "weather_connections_rejected_total";
/// Sessions that have finished, for any reason (counter).
pub const SESSIONS_CLOSED_TOTAL: &str = "weather_sessions_closed_total";
/// Currently running sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "weather_sessions_active";
/// Readings stored in the registry (counter).
pub const READINGS_ACCEPTED_TOTAL: &str = "weather_readings_accepted_total";
/// Readings dropped as out-of-order or duplicate (counter).
pub const READINGS_STALE_TOTAL: &str = "weather_readings_stale_total";
/// Frames rejected by the codec or session checks (counter).
pub const FRAMES_MALFORMED_TOTAL: &str = "weather_frames_malformed_total";

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub sessions_closed: u64,
    pub readings_accepted: u64,
    pub readings_stale: u64,
    pub frames_malformed: u64,
}

#[derive(Debug, Default)]
pub struct ServerStats {
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    sessions_closed: AtomicU64,
    readings_accepted: AtomicU64,
    readings_stale: AtomicU64,
    frames_malformed: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CONNECTIONS_ACCEPTED_TOTAL).increment(1);
        metrics::gauge!(SESSIONS_ACTIVE).increment(1.0);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(SESSIONS_CLOSED_TOTAL).increment(1);
        metrics::gauge!(SESSIONS_ACTIVE).decrement(1.0);
    }

    pub fn reading_accepted(&self) {
        self.readings_accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(READINGS_ACCEPTED_TOTAL).increment(1);
    }

    pub fn reading_stale(&self) {
        self.readings_stale.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(READINGS_STALE_TOTAL).increment(1);
    }

    pub fn frame_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(FRAMES_MALFORMED_TOTAL).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_stale: self.readings_stale.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
        }
    }
}
