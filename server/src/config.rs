//! Server configuration
//!
//! `Args` is the command-line/environment surface; it is validated into a
//! plain [`ServerConfig`] that the rest of the crate consumes.

use crate::error::ServerError;
use crate::session::SessionConfig;
use clap::Parser;
use std::time::Duration;
use weather_shared::protocol::{
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MALFORMED_THRESHOLD, DEFAULT_SERVER_ADDR,
};

/// Default limit on concurrently connected stations
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// Default time live sessions get to finish after a stop request
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

/// Default interval of the periodic station summary log line
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 30;

/// Configuration for the telemetry server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (host:port)
    pub bind_addr: String,
    /// Connections beyond this many are accepted and immediately closed
    pub max_sessions: usize,
    /// Consecutive malformed frames before a session is closed
    pub malformed_threshold: u32,
    /// How long `stop()` waits for sessions before aborting them
    pub grace_period: Duration,
    /// Read inactivity that closes a session
    pub idle_timeout: Duration,
    /// Interval of the station summary log line (`None` disables it)
    pub report_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_SERVER_ADDR.into(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            malformed_threshold: DEFAULT_MALFORMED_THRESHOLD,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            report_interval: Some(Duration::from_secs(DEFAULT_REPORT_INTERVAL_SECS)),
        }
    }
}

impl ServerConfig {
    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ServerError::InvalidConfig("bind address is empty".into()));
        }
        if self.max_sessions == 0 {
            return Err(ServerError::InvalidConfig(
                "max_sessions must be at least 1".into(),
            ));
        }
        if self.malformed_threshold == 0 {
            return Err(ServerError::InvalidConfig(
                "malformed_threshold must be at least 1".into(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(ServerError::InvalidConfig(
                "idle_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Per-session settings derived from this config
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            malformed_threshold: self.malformed_threshold,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Collects telemetry from weather stations over TCP."
)]
pub struct Args {
    /// Address to listen on for station connections
    #[arg(long, env = "WEATHER_BIND", default_value = DEFAULT_SERVER_ADDR)]
    pub bind: String,

    /// Maximum number of concurrently connected stations
    #[arg(long, env = "WEATHER_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Consecutive malformed frames tolerated before a station is disconnected
    #[arg(long, env = "WEATHER_MALFORMED_THRESHOLD", default_value_t = DEFAULT_MALFORMED_THRESHOLD)]
    pub malformed_threshold: u32,

    /// Seconds sessions get to finish on shutdown before being aborted
    #[arg(long, env = "WEATHER_GRACE_PERIOD_SECS", default_value_t = DEFAULT_GRACE_PERIOD_SECS)]
    pub grace_period_secs: u64,

    /// Seconds without data before a station is disconnected
    #[arg(long, env = "WEATHER_IDLE_TIMEOUT_SECS", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,

    /// Seconds between station summary log lines (0 disables)
    #[arg(long, env = "WEATHER_REPORT_INTERVAL_SECS", default_value_t = DEFAULT_REPORT_INTERVAL_SECS)]
    pub report_interval_secs: u64,
}

impl Args {
    /// Convert into a validated [`ServerConfig`]
    pub fn into_config(self) -> Result<ServerConfig, ServerError> {
        let config = ServerConfig {
            bind_addr: self.bind,
            max_sessions: self.max_sessions,
            malformed_threshold: self.malformed_threshold,
            grace_period: Duration::from_secs(self.grace_period_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            report_interval: (self.report_interval_secs > 0)
                .then(|| Duration::from_secs(self.report_interval_secs)),
        };
        config.validate()?;
        Ok(config)
    }
}
