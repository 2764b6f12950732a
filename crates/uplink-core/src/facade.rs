//! Read-only query surface for the control API.
//!
//! A thin view over the health monitor and the route manager, serialized
//! under one coarse mutex so the RPC layer can hit it from any number of
//! request tasks without thinking about the engine's lock order.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::health::HealthMonitor;
use crate::route::RouteManager;
use crate::status::Status;

/// Per-interface status as handed to the RPC layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceStatusReport {
    pub if_name: String,
    pub status: String,
    /// Human-readable local time of the last completed probe; empty if
    /// the interface has never been checked.
    pub last_checked_at: String,
}

pub struct QueryFacade {
    routes: Arc<RouteManager>,
    monitor: Arc<HealthMonitor>,
    mutex: Mutex<()>,
}

impl QueryFacade {
    pub fn new(routes: Arc<RouteManager>, monitor: Arc<HealthMonitor>) -> Self {
        QueryFacade {
            routes,
            monitor,
            mutex: Mutex::new(()),
        }
    }

    /// Interface of the current primary default gateway, if any.
    pub fn default_gateway(&self) -> Option<String> {
        let _guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.routes.primary_default_gw_interface()
    }

    /// Status and last-checked time of every monitored interface, sorted
    /// by name for stable output.
    pub fn interface_statuses(&self) -> Vec<IfaceStatusReport> {
        let _guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        let mut names = self.monitor.interface_names();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| {
                let (status, checked_at) = self.monitor.check_status(&name)?;
                Some(IfaceStatusReport {
                    if_name: name,
                    status: status.as_str().to_string(),
                    last_checked_at: checked_at
                        .map(|ts| ts.format("%a %b %e %H:%M:%S %Y").to_string())
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Forces `if_name` to become the primary default gateway.
    pub fn force_new_gateway(&self, if_name: &str) -> Status {
        let _guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.routes.set_default_gw(if_name)
    }
}
