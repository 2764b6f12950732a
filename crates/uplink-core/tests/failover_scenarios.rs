//! End-to-end failover scenarios.
//!
//! The full engine — health monitor, route manager, policy — wired
//! against a scripted prober and an in-memory routing table, with the
//! real probe loops and event dispatchers running.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use uplink_core::{
    FailoverPolicy, HealthMonitor, LinkStatus, Prober, QueryFacade, RouteEntry, RouteError,
    RouteManager, RouteTable,
};

const GW_ETH0: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
const GW_ETH1: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const GW_USB0: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

const PROBE_TICK: Duration = Duration::from_millis(20);

/// Prober controlled by the test.
struct ScriptedProber {
    statuses: Mutex<HashMap<String, LinkStatus>>,
}

impl ScriptedProber {
    fn new() -> Self {
        ScriptedProber {
            statuses: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, iface: &str, status: LinkStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(iface.to_string(), status);
    }
}

impl Prober for ScriptedProber {
    fn probe(&self, iface: &str) -> LinkStatus {
        self.statuses
            .lock()
            .unwrap()
            .get(iface)
            .copied()
            .unwrap_or(LinkStatus::Unknown)
    }
}

/// In-memory routing table; writes are applied with the kernel metric
/// bias so a route added with metric `m` reads back as `m - 1`.
struct FakeRouteTable {
    entries: Mutex<Vec<RouteEntry>>,
    write_count: Mutex<usize>,
}

impl FakeRouteTable {
    fn new(entries: Vec<RouteEntry>) -> Self {
        FakeRouteTable {
            entries: Mutex::new(entries),
            write_count: Mutex::new(0),
        }
    }

    fn write_count(&self) -> usize {
        *self.write_count.lock().unwrap()
    }
}

fn default_route(if_name: &str, gw: Ipv4Addr, metric: i32) -> RouteEntry {
    RouteEntry {
        if_name: if_name.to_string(),
        dst: Ipv4Addr::UNSPECIFIED,
        gw,
        metric,
    }
}

impl RouteTable for FakeRouteTable {
    fn read_entries(&self) -> Result<Vec<RouteEntry>, RouteError> {
        Ok(self.entries.lock().unwrap().clone())
    }

    fn add_default_route(
        &self,
        if_name: &str,
        metric: i32,
        gw: Ipv4Addr,
    ) -> Result<(), RouteError> {
        *self.write_count.lock().unwrap() += 1;
        self.entries
            .lock()
            .unwrap()
            .push(default_route(if_name, gw, metric - 1));
        Ok(())
    }

    fn delete_default_route(
        &self,
        if_name: &str,
        metric: i32,
        gw: Ipv4Addr,
    ) -> Result<(), RouteError> {
        *self.write_count.lock().unwrap() += 1;
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|e| {
            e.is_default() && e.if_name == if_name && e.metric == metric - 1 && e.gw == gw
        }) {
            entries.remove(pos);
        }
        Ok(())
    }
}

struct Engine {
    prober: Arc<ScriptedProber>,
    table: Arc<FakeRouteTable>,
    monitor: Arc<HealthMonitor>,
    routes: Arc<RouteManager>,
    _policy: Arc<FailoverPolicy>,
}

impl Engine {
    /// Brings up the whole engine with running check loops. The route
    /// sync interval is long; tests step it with `sync_now`.
    fn start(entries: Vec<RouteEntry>, preference: &[&str]) -> Self {
        let prober = Arc::new(ScriptedProber::new());
        let table = Arc::new(FakeRouteTable::new(entries));
        let monitor = Arc::new(HealthMonitor::new(
            &["eth0", "eth1", "usb0"].map(String::from),
            prober.clone(),
            PROBE_TICK,
        ));
        let routes = Arc::new(RouteManager::new(table.clone(), Duration::from_secs(3600)));
        let policy = FailoverPolicy::new(monitor.clone(), routes.clone());
        policy.set_preferred_gateway_interfaces(
            &preference.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        );
        assert!(monitor.start_checks().is_ok());
        assert!(routes.start_checks().is_ok());
        Engine {
            prober,
            table,
            monitor,
            routes,
            _policy: policy,
        }
    }

    fn stop(&self) {
        self.routes.stop_checks();
        self.monitor.stop_checks();
    }
}

/// Polls `cond` until it holds or the timeout elapses.
fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Waits until the monitor has observed `status` for `iface`.
fn wait_for_status(engine: &Engine, iface: &str, status: LinkStatus) {
    assert!(
        wait_for(|| matches!(
            engine.monitor.check_status(iface),
            Some((s, _)) if s == status
        )),
        "{iface} never reached {}",
        status.as_str()
    );
}

#[test]
fn healthy_interface_without_route_is_not_promoted() {
    // Preference [eth1, usb0, eth0]; routes only for eth0 and usb0.
    let engine = Engine::start(
        vec![
            default_route("eth0", GW_ETH0, 100),
            default_route("usb0", GW_USB0, 200),
        ],
        &["eth1", "usb0", "eth0"],
    );
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("eth0")
    }));

    engine.prober.set("eth1", LinkStatus::Healthy);
    wait_for_status(&engine, "eth1", LinkStatus::Healthy);
    // Give the policy a chance to (wrongly) react before checking.
    thread::sleep(Duration::from_millis(100));

    assert_eq!(engine.table.write_count(), 0);
    engine.routes.sync_now();
    assert_eq!(
        engine.routes.primary_default_gw_interface().as_deref(),
        Some("eth0")
    );
    engine.stop();
}

#[test]
fn primary_health_loss_fails_over_to_runner_up() {
    // Preference [eth1, usb0, eth0]; routes eth1/100, usb0/200, eth0/300.
    let engine = Engine::start(
        vec![
            default_route("eth1", GW_ETH1, 100),
            default_route("usb0", GW_USB0, 200),
            default_route("eth0", GW_ETH0, 300),
        ],
        &["eth1", "usb0", "eth0"],
    );
    for iface in ["eth0", "eth1", "usb0"] {
        engine.prober.set(iface, LinkStatus::Healthy);
        wait_for_status(&engine, iface, LinkStatus::Healthy);
    }
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("eth1")
    }));

    engine.prober.set("eth1", LinkStatus::Unhealthy);
    wait_for_status(&engine, "eth1", LinkStatus::Unhealthy);

    // The policy switches to usb0; the next sync publishes it.
    assert!(wait_for(|| engine.table.write_count() >= 4));
    engine.routes.sync_now();
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("usb0")
    }));
    engine.stop();
}

#[test]
fn unhealthy_non_primary_changes_nothing() {
    let engine = Engine::start(
        vec![
            default_route("eth1", GW_ETH1, 100),
            default_route("usb0", GW_USB0, 200),
            default_route("eth0", GW_ETH0, 300),
        ],
        &["eth1", "usb0", "eth0"],
    );
    for iface in ["eth0", "eth1", "usb0"] {
        engine.prober.set(iface, LinkStatus::Healthy);
        wait_for_status(&engine, iface, LinkStatus::Healthy);
    }
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("eth1")
    }));
    let writes_before = engine.table.write_count();

    engine.prober.set("eth0", LinkStatus::Unhealthy);
    wait_for_status(&engine, "eth0", LinkStatus::Unhealthy);
    thread::sleep(Duration::from_millis(100));

    assert_eq!(engine.table.write_count(), writes_before);
    engine.routes.sync_now();
    assert_eq!(
        engine.routes.primary_default_gw_interface().as_deref(),
        Some("eth1")
    );
    engine.stop();
}

#[test]
fn recovered_preferred_interface_takes_back_the_default_route() {
    let engine = Engine::start(
        vec![
            default_route("eth1", GW_ETH1, 100),
            default_route("usb0", GW_USB0, 200),
        ],
        &["eth1", "usb0"],
    );
    engine.prober.set("eth1", LinkStatus::Healthy);
    engine.prober.set("usb0", LinkStatus::Healthy);
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("eth1")
    }));

    // eth1 dies; usb0 takes over after the next sync.
    engine.prober.set("eth1", LinkStatus::Unhealthy);
    wait_for_status(&engine, "eth1", LinkStatus::Unhealthy);
    assert!(wait_for(|| engine.table.write_count() >= 4));
    engine.routes.sync_now();
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("usb0")
    }));

    // eth1 recovers and outranks usb0, so it is promoted back.
    engine.prober.set("eth1", LinkStatus::Healthy);
    wait_for_status(&engine, "eth1", LinkStatus::Healthy);
    assert!(wait_for(|| engine.table.write_count() >= 8));
    engine.routes.sync_now();
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("eth1")
    }));
    engine.stop();
}

#[test]
fn set_default_gw_then_sync_publishes_new_primary() {
    let engine = Engine::start(
        vec![
            default_route("eth0", GW_ETH0, 0),
            default_route("usb0", GW_USB0, 100),
        ],
        &["usb0", "eth0"],
    );
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("eth0")
    }));

    let status = engine.routes.set_default_gw("usb0");
    assert!(status.is_ok(), "swap failed: {status}");
    engine.routes.sync_now();
    assert!(wait_for(|| {
        engine.routes.primary_default_gw_interface().as_deref() == Some("usb0")
    }));
    engine.stop();
}

#[test]
fn facade_reports_match_engine_state() {
    let engine = Engine::start(
        vec![default_route("eth0", GW_ETH0, 100)],
        &["eth0"],
    );
    let facade = QueryFacade::new(engine.routes.clone(), engine.monitor.clone());

    engine.prober.set("eth0", LinkStatus::Healthy);
    wait_for_status(&engine, "eth0", LinkStatus::Healthy);
    assert!(wait_for(|| facade.default_gateway().as_deref() == Some("eth0")));

    let reports = facade.interface_statuses();
    assert_eq!(reports.len(), 3);
    let eth0 = reports.iter().find(|r| r.if_name == "eth0").unwrap();
    assert_eq!(eth0.status, "HEALTHY");
    assert!(!eth0.last_checked_at.is_empty());

    engine.stop();
}

#[test]
fn no_events_after_stop() {
    let engine = Engine::start(
        vec![default_route("eth0", GW_ETH0, 100)],
        &["eth0"],
    );
    engine.prober.set("eth0", LinkStatus::Healthy);
    wait_for_status(&engine, "eth0", LinkStatus::Healthy);
    engine.stop();

    let writes = engine.table.write_count();
    engine.prober.set("eth0", LinkStatus::Unhealthy);
    thread::sleep(Duration::from_millis(150));
    // No probe loop is running, so no status change, no policy action.
    assert_eq!(engine.table.write_count(), writes);
    assert!(matches!(
        engine.monitor.check_status("eth0"),
        Some((LinkStatus::Healthy, Some(_)))
    ));
}
