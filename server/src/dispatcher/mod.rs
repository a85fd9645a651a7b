//! Listener and session dispatch for the server
//!
//! This module handles:
//! - Binding the station listener
//! - Spawning one session task per accepted connection
//! - Refusing connections beyond the session limit
//! - Graceful shutdown with a bounded grace period

mod listener;
mod shutdown;

pub use listener::{Dispatcher, DispatcherHandle};
pub use shutdown::StopReport;
