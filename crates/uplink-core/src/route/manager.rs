//! Route manager.
//!
//! Mirrors the kernel's IPv4 routing table on a fixed cadence, tracks
//! which interface currently holds the lowest-metric default route, and
//! reprograms default routes to elect a new primary on request.
//!
//! Gateway-change events go through the same bounded-channel dispatcher
//! scheme as the health monitor: one consumer thread, FIFO delivery, no
//! emitter lock held while the listener runs.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::table::{RouteEntry, RouteTable};
use crate::status::Status;

/// Invoked with the new primary interface (or `None` when the last
/// default route disappeared).
pub type GatewayChangeListener = Arc<dyn Fn(Option<&str>) + Send + Sync>;

const EVENT_QUEUE_DEPTH: usize = 16;

struct ManagerState {
    routing_entries: Vec<RouteEntry>,
    current_primary: Option<String>,
    /// Every interface ever seen holding a default route, kept to notice
    /// disappearances.
    known_gateways: HashSet<String>,
    checks_on: bool,
    events_tx: Option<Sender<Option<String>>>,
}

struct Shared {
    state: Mutex<ManagerState>,
    checks_loop_cond: Condvar,
}

struct SyncRuntime {
    worker: thread::JoinHandle<()>,
    dispatcher: thread::JoinHandle<()>,
}

/// Watches the routing table and manages the primary default gateway.
pub struct RouteManager {
    table: Arc<dyn RouteTable>,
    shared: Arc<Shared>,
    listener: Arc<Mutex<Option<GatewayChangeListener>>>,
    runtime: Mutex<Option<SyncRuntime>>,
    sync_interval: Duration,
}

impl RouteManager {
    pub fn new(table: Arc<dyn RouteTable>, sync_interval: Duration) -> Self {
        RouteManager {
            table,
            shared: Arc::new(Shared {
                state: Mutex::new(ManagerState {
                    routing_entries: Vec::new(),
                    current_primary: None,
                    known_gateways: HashSet::new(),
                    checks_on: false,
                    events_tx: None,
                }),
                checks_loop_cond: Condvar::new(),
            }),
            listener: Arc::new(Mutex::new(None)),
            runtime: Mutex::new(None),
            sync_interval,
        }
    }

    /// Sets or replaces the gateway-change listener. It fires at least
    /// once after the first successful sync.
    pub fn register_on_gateway_change(&self, listener: GatewayChangeListener) {
        *self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Starts the periodic routing-table sync. `NoOp` if already running.
    pub fn start_checks(&self) -> Status {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        if runtime.is_some() {
            warn!("start_checks called while route sync already running");
            return Status::no_op("route sync already running");
        }

        let (events_tx, events_rx) = bounded::<Option<String>>(EVENT_QUEUE_DEPTH);
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.checks_on = true;
            state.events_tx = Some(events_tx);
        }

        let dispatcher = spawn_dispatcher(events_rx, self.listener.clone());
        let shared = self.shared.clone();
        let table = self.table.clone();
        let interval = self.sync_interval;
        let worker = thread::Builder::new()
            .name("route-sync".into())
            .spawn(move || sync_loop(shared, table, interval))
            .expect("failed to spawn route sync loop");

        info!("routing-table sync started");
        *runtime = Some(SyncRuntime { worker, dispatcher });
        Status::ok()
    }

    /// Stops the sync loop and waits for it, then drains and joins the
    /// event dispatcher. `NoOp` if not running.
    ///
    /// The runtime slot stays locked across the joins so a concurrent
    /// `start_checks` cannot interleave with the teardown.
    pub fn stop_checks(&self) -> Status {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rt) = runtime.take() else {
            warn!("stop_checks called while route sync not running");
            return Status::no_op("route sync is not running");
        };

        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.checks_on = false;
        }
        self.shared.checks_loop_cond.notify_all();
        let _ = rt.worker.join();
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.events_tx = None;
        }
        let _ = rt.dispatcher.join();
        info!("routing-table sync stopped");
        Status::ok()
    }

    /// Runs one sync pass immediately. Returns `false` when the table
    /// could not be read (the previous snapshot is kept).
    pub fn sync_now(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        sync_pass(&mut state, self.table.as_ref())
    }

    /// Interface of the current primary default gateway, if any.
    pub fn primary_default_gw_interface(&self) -> Option<String> {
        let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.current_primary.clone()
    }

    /// Human-readable snapshot of the routing table, one entry per line.
    pub fn routing_table_as_str(&self) -> String {
        let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = String::new();
        for entry in &state.routing_entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// Atomically re-elects `new_gw_name` as the primary default gateway
    /// by swapping its metric with the current primary's.
    ///
    /// Works on the latest snapshot, under the state lock. The window
    /// with no default route installed is kept as short as possible: both
    /// adds are attempted regardless of the first one's result.
    pub fn set_default_gw(&self, new_gw_name: &str) -> Status {
        let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut gateways: Vec<&RouteEntry> = state
            .routing_entries
            .iter()
            .filter(|e| e.is_default())
            .collect();
        gateways.sort_by_key(|e| e.metric);
        debug!(
            order = ?gateways.iter().map(|e| e.if_name.as_str()).collect::<Vec<_>>(),
            "current order of gateways"
        );

        if gateways.is_empty() {
            warn!("there are no default gateways");
            return Status::not_found("there are no default gateways");
        }
        let current = gateways[0];
        if current.if_name == new_gw_name {
            info!(iface = %new_gw_name, "interface is already the default gateway");
            return Status::no_op(format!("interface {new_gw_name} was already default"));
        }
        let Some(new_entry) = gateways.iter().find(|e| e.if_name == new_gw_name) else {
            warn!(iface = %new_gw_name, "interface does not have a routing entry");
            return Status::not_found(format!(
                "interface {new_gw_name} does not have a routing entry"
            ));
        };

        // The kernel stores one more than the /proc-visible metric.
        let current_default_gw_metric = current.metric + 1;
        let current_new_gw_metric = new_entry.metric + 1;

        info!(
            demote = %current.if_name,
            promote = %new_entry.if_name,
            "reprogramming default routes"
        );
        if let Err(err) =
            self.table
                .delete_default_route(&new_entry.if_name, current_new_gw_metric, new_entry.gw)
        {
            error!(error = %err, "could not delete old route for new gateway");
            return Status::unknown_error("could not delete old route for new gateway");
        }
        if let Err(err) =
            self.table
                .delete_default_route(&current.if_name, current_default_gw_metric, current.gw)
        {
            error!(error = %err, "could not delete old route for old gateway");
            return Status::unknown_error("could not delete old route for old gateway");
        }
        // Attempt both additions regardless of individual results.
        let res_old =
            self.table
                .add_default_route(&current.if_name, current_new_gw_metric, current.gw);
        let res_new =
            self.table
                .add_default_route(&new_entry.if_name, current_default_gw_metric, new_entry.gw);
        if let Err(err) = &res_old {
            error!(error = %err, iface = %current.if_name, "could not re-add route");
        }
        if let Err(err) = &res_new {
            error!(error = %err, iface = %new_entry.if_name, "could not re-add route");
        }
        if res_old.is_err() || res_new.is_err() {
            return Status::unknown_error("could not successfully add one of the routes");
        }

        info!("default-route reprogramming done");
        Status::ok()
    }
}

impl Drop for RouteManager {
    fn drop(&mut self) {
        let _ = self.stop_checks();
    }
}

fn sync_loop(shared: Arc<Shared>, table: Arc<dyn RouteTable>, interval: Duration) {
    loop {
        let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.checks_on {
            break;
        }
        sync_pass(&mut state, table.as_ref());
        debug!(entries = state.routing_entries.len(), "routing table synced");

        let deadline = Instant::now() + interval;
        loop {
            if !state.checks_on {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _timed_out) = shared
                .checks_loop_cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }
}

/// One sync pass over the kernel table. Caller holds the state lock.
fn sync_pass(state: &mut ManagerState, table: &dyn RouteTable) -> bool {
    let entries = match table.read_entries() {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, "could not refresh routing table; keeping previous snapshot");
            return false;
        }
    };
    state.routing_entries = entries;

    let present: HashSet<String> = state
        .routing_entries
        .iter()
        .filter(|e| e.is_default())
        .map(|e| e.if_name.clone())
        .collect();
    for name in &present {
        if state.known_gateways.insert(name.clone()) {
            debug!(iface = %name, "recording known gateway interface");
        }
    }
    for name in state.known_gateways.difference(&present) {
        warn!(iface = %name, "expected gateway missing from routing table");
    }

    let primary = detect_primary(&state.routing_entries);
    if primary != state.current_primary {
        info!(
            old = state.current_primary.as_deref().unwrap_or("<none>"),
            new = primary.as_deref().unwrap_or("<none>"),
            "primary default gateway changed"
        );
        state.current_primary = primary;
        if let Some(tx) = &state.events_tx {
            if tx.try_send(state.current_primary.clone()).is_err() {
                warn!("could not queue gateway-change event");
            }
        }
    }
    true
}

/// The default-route entry with the minimum metric wins; on a metric tie
/// the first encountered entry is kept and the collision is logged.
fn detect_primary(entries: &[RouteEntry]) -> Option<String> {
    let mut min_metric: Option<i32> = None;
    let mut primary: Option<String> = None;
    for entry in entries {
        if !entry.is_default() {
            continue;
        }
        match min_metric {
            Some(min) if entry.metric > min => {}
            Some(min) if entry.metric == min => {
                error!(entry = %entry, "two default routes with the same metric");
            }
            _ => {
                min_metric = Some(entry.metric);
                primary = Some(entry.if_name.clone());
            }
        }
    }
    primary
}

fn spawn_dispatcher(
    rx: Receiver<Option<String>>,
    listener: Arc<Mutex<Option<GatewayChangeListener>>>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("gw-events".into())
        .spawn(move || {
            for new_gw in rx.iter() {
                let cb = listener.lock().unwrap_or_else(|e| e.into_inner()).clone();
                if let Some(cb) = cb {
                    let result =
                        panic::catch_unwind(AssertUnwindSafe(|| cb(new_gw.as_deref())));
                    if result.is_err() {
                        error!("gateway-change listener panicked");
                    }
                }
            }
        })
        .expect("failed to spawn gateway event dispatcher")
}
