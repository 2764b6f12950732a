//! Failover policy.
//!
//! Subscribes to the health monitor's status changes and the route
//! manager's gateway changes, holds the operator's preference order, and
//! decides when the primary default gateway must move.
//!
//! The preference mutex is never held across a call into the route
//! manager: the list is cloned out first, keeping the lock order
//! policy → route-manager state → health-monitor state intact.

use std::sync::{Arc, Mutex, Weak};

use tracing::{info, warn};

use crate::health::HealthMonitor;
use crate::probe::LinkStatus;
use crate::route::RouteManager;
use crate::status::ErrorCode;

/// Decides which uplink should own the default route.
pub struct FailoverPolicy {
    monitor: Arc<HealthMonitor>,
    routes: Arc<RouteManager>,
    /// Preferred gateway interfaces, highest preference first.
    gw_interface_order: Mutex<Vec<String>>,
}

impl FailoverPolicy {
    /// Builds the policy and registers its listeners with both sources.
    pub fn new(monitor: Arc<HealthMonitor>, routes: Arc<RouteManager>) -> Arc<Self> {
        let policy = Arc::new(FailoverPolicy {
            monitor: monitor.clone(),
            routes: routes.clone(),
            gw_interface_order: Mutex::new(Vec::new()),
        });

        let weak: Weak<FailoverPolicy> = Arc::downgrade(&policy);
        monitor.register_on_status_change(Arc::new(move |name, old, new| {
            if let Some(policy) = weak.upgrade() {
                policy.on_if_status_changed(name, old, new);
            }
        }));
        let weak = Arc::downgrade(&policy);
        routes.register_on_gateway_change(Arc::new(move |new_gw| {
            if let Some(policy) = weak.upgrade() {
                policy.on_gw_changed(new_gw);
            }
        }));

        policy
    }

    /// Replaces the preference list. Position 0 is the highest
    /// preference; duplicates are dropped.
    pub fn set_preferred_gateway_interfaces(&self, interfaces: &[String]) {
        let mut order = self
            .gw_interface_order
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        order.clear();
        info!("resetting preferred gateway interfaces");
        for name in interfaces {
            if order.contains(name) {
                warn!(iface = %name, "duplicate entry in preference list; ignoring");
                continue;
            }
            info!(iface = %name, "adding preferred gateway interface");
            order.push(name.clone());
        }
    }

    /// Current preference list, highest preference first.
    pub fn preferred_gateway_interfaces(&self) -> Vec<String> {
        self.preference_snapshot()
    }

    fn preference_snapshot(&self) -> Vec<String> {
        self.gw_interface_order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn on_if_status_changed(&self, if_name: &str, old: LinkStatus, new: LinkStatus) {
        if old == new {
            warn!(
                iface = %if_name,
                status = old.as_str(),
                "interface has not changed state"
            );
            return;
        }
        info!(
            iface = %if_name,
            old = old.as_str(),
            new = new.as_str(),
            "interface status changed"
        );
        let current_gateway = self.routes.primary_default_gw_interface();
        match new {
            LinkStatus::Healthy => self.consider_promotion(if_name, current_gateway),
            // Anything other than healthy is treated alike: if the device
            // was the gateway, move to a healthy alternative.
            _ => self.consider_demotion(if_name, current_gateway),
        }
    }

    /// `if_name` turned healthy: promote it if it outranks the current
    /// primary.
    fn consider_promotion(&self, if_name: &str, current_gateway: Option<String>) {
        if current_gateway.as_deref() == Some(if_name) {
            info!(
                iface = %if_name,
                "newly healthy interface is already the gateway, nothing to do"
            );
            return;
        }
        let order = self.preference_snapshot();
        let Some(new_priority) = order.iter().position(|n| n == if_name) else {
            warn!(iface = %if_name, "interface not in the preferred gateways list");
            return;
        };
        let Some(current) = current_gateway else {
            info!(
                iface = %if_name,
                "no current primary gateway; the route sync will pick one up"
            );
            return;
        };
        // An interface missing from the list ranks below every listed one.
        let current_priority = order
            .iter()
            .position(|n| *n == current)
            .unwrap_or(order.len());
        if new_priority >= current_priority {
            info!(
                iface = %if_name,
                "newly healthy interface has lower priority than the current gateway, skipping"
            );
            return;
        }
        let status = self.routes.set_default_gw(if_name);
        if !status.is_ok() {
            warn!(iface = %if_name, status = %status, "could not promote interface");
        }
    }

    /// `if_name` left the healthy state: if it was the primary, fail over
    /// to the most preferred healthy alternative.
    fn consider_demotion(&self, if_name: &str, current_gateway: Option<String>) {
        if current_gateway.as_deref() != Some(if_name) {
            info!(
                iface = %if_name,
                "interface is unhealthy but was not the default gateway, nothing to do"
            );
            return;
        }
        let order = self.preference_snapshot();
        for candidate in &order {
            let Some((status, _checked_at)) = self.monitor.check_status(candidate) else {
                continue;
            };
            if status == LinkStatus::Healthy {
                info!(iface = %candidate, "interface is healthy, switching gateway");
                let result = self.routes.set_default_gw(candidate);
                if !result.is_ok() {
                    warn!(iface = %candidate, status = %result, "gateway switch failed");
                }
                return;
            }
        }
        warn!(
            iface = %if_name,
            "no healthy alternative gateway found; leaving routes unchanged"
        );
    }

    /// The route sync observed a new primary. If it is not the most
    /// preferred healthy interface, correct it; the corrective change
    /// produces one follow-up event that observes the corrected primary
    /// and takes no further action.
    fn on_gw_changed(&self, new_gw: Option<&str>) {
        info!(
            gateway = new_gw.unwrap_or("<none>"),
            "primary default gateway changed"
        );
        let order = self.preference_snapshot();
        let best = order.iter().find(|candidate| {
            matches!(
                self.monitor.check_status(candidate),
                Some((LinkStatus::Healthy, _))
            )
        });
        let Some(best) = best else {
            return;
        };
        if new_gw == Some(best.as_str()) {
            return;
        }
        info!(
            iface = %best,
            "new gateway is not the preferred healthy interface; reverting"
        );
        let status = self.routes.set_default_gw(best);
        if !status.is_ok() && status.code() != ErrorCode::NoOp {
            warn!(iface = %best, status = %status, "could not restore preferred gateway");
        }
    }
}
