//! Weather Telemetry Server
//!
//! Accepts persistent TCP connections from weather stations, decodes their
//! line-oriented readings, and keeps the latest reading per station in a
//! shared [`Registry`] that downstream consumers query.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod reporter;
pub mod session;
pub mod stats;

pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, DispatcherHandle, StopReport};
pub use error::ServerError;
pub use registry::{Registry, UpsertOutcome};
pub use reporter::StationReporter;
