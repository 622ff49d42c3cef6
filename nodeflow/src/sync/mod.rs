//! Synchronization utilities.

mod monitor;

pub use monitor::{Monitor, MonitorGuard};
