//! Agent configuration.
//!
//! A TOML file mirrors the engine options plus the control API listen
//! address; command-line flags override individual fields.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use uplink_core::EngineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Control API listen address.
    pub listen_addr: SocketAddr,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 50051)),
            engine: EngineConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("could not parse config file {}", path.display()))
    }
}

/// Flag values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub interfaces: Vec<String>,
    pub preference: Vec<String>,
    pub listen: Option<SocketAddr>,
    pub probe_anchor: Option<Ipv4Addr>,
    pub health_check_interval: Option<f64>,
    pub route_sync_interval: Option<f64>,
}

impl AgentConfig {
    pub fn apply(&mut self, overrides: Overrides) {
        if !overrides.interfaces.is_empty() {
            self.engine.monitored_interfaces = overrides.interfaces;
        }
        if !overrides.preference.is_empty() {
            self.engine.preference_order = overrides.preference;
        }
        if let Some(listen) = overrides.listen {
            self.listen_addr = listen;
        }
        if let Some(anchor) = overrides.probe_anchor {
            self.engine.probe.probe_anchor = anchor;
        }
        if let Some(interval) = overrides.health_check_interval {
            self.engine.health_check_interval_s = interval;
        }
        if let Some(interval) = overrides.route_sync_interval {
            self.engine.route_sync_interval_s = interval;
        }
        // The preference order defaults to the monitored list itself.
        if self.engine.preference_order.is_empty() {
            self.engine.preference_order = self.engine.monitored_interfaces.clone();
        }
    }
}
