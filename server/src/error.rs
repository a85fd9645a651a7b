//! Process-level errors
//!
//! Everything that goes wrong inside a single session stays inside that
//! session; only these errors reach the caller of the server.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
