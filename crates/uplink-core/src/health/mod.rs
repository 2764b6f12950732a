//! Per-uplink liveness monitoring.

mod monitor;

pub use monitor::{HealthMonitor, StatusChangeListener};
