//! Weather Telemetry Shared Types
//!
//! This crate provides the reading model and line codec shared by the
//! collection server and the station clients.

pub mod codec;
pub mod reading;

use std::time::{SystemTime, UNIX_EPOCH};

pub use reading::{Reading, ValidationError};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol parameters shared by server and stations
pub mod protocol {
    /// Default listen/connect address of the collection server
    pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:39000";

    /// Longest accepted frame, excluding the delimiter
    pub const MAX_FRAME_LEN: usize = 2048;

    /// Longest accepted station identifier
    pub const MAX_STATION_ID_LEN: usize = 64;

    /// Accepted temperature range in degrees Celsius
    pub const TEMPERATURE_RANGE: (f64, f64) = (-100.0, 100.0);

    /// Accepted relative humidity range in percent
    pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

    /// Upper bound for barometric pressure in hPa (lower bound is exclusive zero)
    pub const PRESSURE_MAX_HPA: f64 = 2000.0;

    /// Consecutive malformed frames tolerated before a session is closed
    pub const DEFAULT_MALFORMED_THRESHOLD: u32 = 3;

    /// Seconds of read inactivity before a session is dropped
    pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
}
