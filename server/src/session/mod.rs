//! Session management for connected stations
//!
//! This module handles:
//! - Reading and decoding one station's frame stream
//! - Identifying the station and enforcing a fixed station id
//! - Counting malformed frames and closing broken connections
//! - Tracking the set of live sessions for shutdown and queries

mod connection;
mod manager;

pub use connection::{CloseReason, SessionConfig, SessionError, SessionState, StationSession};
pub use manager::{SessionGuard, SessionId, SessionInfo, SessionManager};
