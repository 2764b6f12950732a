//! Engine configuration.
//!
//! Every knob is a startup option: the structs deserialize from the
//! daemon's TOML config (field names double as flag names) and changing
//! any of them requires a restart.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::status::Status;

/// Parameters of the ICMP liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Off-host address pinged through each uplink.
    pub probe_anchor: Ipv4Addr,
    /// Per-packet reply timeout.
    pub probe_timeout_s: f64,
    /// Total duration of one probe round.
    pub probe_duration_s: f64,
    /// Spacing between echo requests within a round.
    pub probe_interval_s: f64,
    /// Loss percentage above which an uplink is declared unhealthy.
    pub probe_loss_threshold_pct: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            probe_anchor: Ipv4Addr::new(8, 8, 8, 8),
            probe_timeout_s: 1.0,
            probe_duration_s: 3.0,
            probe_interval_s: 0.5,
            probe_loss_threshold_pct: 25.0,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout_s)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.probe_duration_s)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.probe_interval_s)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Uplinks whose liveness is probed.
    pub monitored_interfaces: Vec<String>,
    /// Gateway preference order, highest preference first. Must be a
    /// subset of `monitored_interfaces`.
    pub preference_order: Vec<String>,
    #[serde(flatten)]
    pub probe: ProbeConfig,
    /// Seconds between liveness probes of each interface.
    pub health_check_interval_s: f64,
    /// Seconds between routing-table syncs.
    pub route_sync_interval_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            monitored_interfaces: Vec::new(),
            preference_order: Vec::new(),
            probe: ProbeConfig::default(),
            health_check_interval_s: 20.0,
            route_sync_interval_s: 5.0,
        }
    }
}

impl EngineConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.health_check_interval_s)
    }

    pub fn route_sync_interval(&self) -> Duration {
        Duration::from_secs_f64(self.route_sync_interval_s)
    }

    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Status {
        for (i, name) in self.monitored_interfaces.iter().enumerate() {
            if self.monitored_interfaces[..i].contains(name) {
                return Status::invalid_arguments(format!(
                    "interface {name} listed twice in monitored_interfaces"
                ));
            }
        }
        for name in &self.preference_order {
            if !self.monitored_interfaces.contains(name) {
                return Status::invalid_arguments(format!(
                    "preference_order entry {name} is not a monitored interface"
                ));
            }
        }
        if self.health_check_interval_s <= 0.0 || self.route_sync_interval_s <= 0.0 {
            return Status::invalid_arguments("check intervals must be positive");
        }
        if self.probe.probe_duration_s <= 0.0 || self.probe.probe_interval_s <= 0.0 {
            return Status::invalid_arguments("probe timings must be positive");
        }
        Status::ok()
    }
}
