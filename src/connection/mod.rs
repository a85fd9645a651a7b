//! Uplink from a simulated station to the collection server
//!
//! Each station keeps one persistent connection, streams a reading per
//! interval, and reconnects with exponential backoff when the link drops.

mod manager;

pub use manager::{StationUplink, UplinkConfig, UplinkEvent};
