//! Interface health monitor.
//!
//! One probe loop per monitored interface, each on its own thread. Probes
//! run outside the state lock; status changes are published as events on
//! a bounded channel drained by a single dispatcher thread, so listener
//! deliveries are serialized in the order the changes were observed and
//! never run under the monitor's locks.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::probe::{LinkStatus, Prober};
use crate::status::Status;

/// Invoked with `(interface, old, new)` after a debounced status change.
pub type StatusChangeListener = Arc<dyn Fn(&str, LinkStatus, LinkStatus) + Send + Sync>;

const EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
struct StatusChange {
    if_name: String,
    old: LinkStatus,
    new: LinkStatus,
}

#[derive(Debug, Clone, Copy)]
struct IfaceRecord {
    status: LinkStatus,
    last_checked_at: Option<DateTime<Local>>,
}

struct MonitorState {
    interfaces: HashMap<String, IfaceRecord>,
    checks_ongoing: bool,
    /// Present only while checks run; dropped on stop so the dispatcher
    /// drains and exits.
    events_tx: Option<Sender<StatusChange>>,
}

struct Shared {
    state: Mutex<MonitorState>,
    checks_loop_cond: Condvar,
}

struct CheckRuntime {
    workers: Vec<thread::JoinHandle<()>>,
    dispatcher: thread::JoinHandle<()>,
}

/// Periodically probes a fixed set of interfaces and reports debounced
/// status transitions.
pub struct HealthMonitor {
    shared: Arc<Shared>,
    prober: Arc<dyn Prober>,
    check_interval: Duration,
    listener: Arc<Mutex<Option<StatusChangeListener>>>,
    runtime: Mutex<Option<CheckRuntime>>,
}

impl HealthMonitor {
    /// Creates a monitor for `interfaces` without a listener.
    pub fn new(interfaces: &[String], prober: Arc<dyn Prober>, check_interval: Duration) -> Self {
        Self::with_listener(interfaces, prober, check_interval, None)
    }

    pub fn with_listener(
        interfaces: &[String],
        prober: Arc<dyn Prober>,
        check_interval: Duration,
        listener: Option<StatusChangeListener>,
    ) -> Self {
        let records = interfaces
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    IfaceRecord {
                        status: LinkStatus::Unknown,
                        last_checked_at: None,
                    },
                )
            })
            .collect();
        HealthMonitor {
            shared: Arc::new(Shared {
                state: Mutex::new(MonitorState {
                    interfaces: records,
                    checks_ongoing: false,
                    events_tx: None,
                }),
                checks_loop_cond: Condvar::new(),
            }),
            prober,
            check_interval,
            listener: Arc::new(Mutex::new(listener)),
            runtime: Mutex::new(None),
        }
    }

    /// Sets or replaces the status-change listener.
    pub fn register_on_status_change(&self, listener: StatusChangeListener) {
        *self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Spawns one probe loop per configured interface. Returns `NoOp` if
    /// checks are already running.
    pub fn start_checks(&self) -> Status {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        if runtime.is_some() {
            warn!("start_checks called while health checks already running");
            return Status::no_op("health checks already running");
        }

        let (events_tx, events_rx) = bounded::<StatusChange>(EVENT_QUEUE_DEPTH);
        let names: Vec<String> = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.checks_ongoing = true;
            state.events_tx = Some(events_tx);
            state.interfaces.keys().cloned().collect()
        };

        let dispatcher = spawn_dispatcher(events_rx, self.listener.clone());
        let mut workers = Vec::with_capacity(names.len());
        for name in names {
            let shared = self.shared.clone();
            let prober = self.prober.clone();
            let interval = self.check_interval;
            let handle = thread::Builder::new()
                .name(format!("probe-{name}"))
                .spawn(move || probe_loop(shared, prober, name, interval))
                .expect("failed to spawn interface probe loop");
            workers.push(handle);
        }

        info!(
            interfaces = workers.len(),
            "interface health checks started"
        );
        *runtime = Some(CheckRuntime {
            workers,
            dispatcher,
        });
        Status::ok()
    }

    /// Stops all probe loops and waits for them, then drains and joins
    /// the event dispatcher. Returns `NoOp` if checks are not running.
    ///
    /// The runtime slot stays locked across the joins so a concurrent
    /// `start_checks` cannot interleave with the teardown.
    pub fn stop_checks(&self) -> Status {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rt) = runtime.take() else {
            warn!("stop_checks called while health checks not running");
            return Status::no_op("health checks are not running");
        };

        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.checks_ongoing = false;
        }
        self.shared.checks_loop_cond.notify_all();
        for handle in rt.workers {
            let _ = handle.join();
        }
        // Dropping the sender ends the dispatcher once the queue is empty,
        // so no listener fires after this returns.
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.events_tx = None;
        }
        let _ = rt.dispatcher.join();
        info!("interface health checks stopped");
        Status::ok()
    }

    /// Returns `(status, last_checked_at)` for a monitored interface, or
    /// `None` for an unknown one.
    pub fn check_status(&self, if_name: &str) -> Option<(LinkStatus, Option<DateTime<Local>>)> {
        let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .interfaces
            .get(if_name)
            .map(|rec| (rec.status, rec.last_checked_at))
    }

    /// Snapshot of the configured interface names.
    pub fn interface_names(&self) -> Vec<String> {
        let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.interfaces.keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn force_status(&self, if_name: &str, status: LinkStatus) {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rec) = state.interfaces.get_mut(if_name) {
            rec.status = status;
            rec.last_checked_at = Some(Local::now());
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        let _ = self.stop_checks();
    }
}

fn probe_loop(shared: Arc<Shared>, prober: Arc<dyn Prober>, name: String, interval: Duration) {
    loop {
        let timestamp = Local::now();
        let next_check = Instant::now() + interval;

        // The probe blocks for up to the probe duration and must not hold
        // the state lock.
        let status = run_probe(prober.as_ref(), &name);

        let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.checks_ongoing {
            break;
        }
        let inner = &mut *state;
        if let Some(rec) = inner.interfaces.get_mut(&name) {
            let old = rec.status;
            rec.last_checked_at = Some(timestamp);
            debug!(iface = %name, status = status.as_str(), "interface checked");
            if old != status {
                rec.status = status;
                info!(
                    iface = %name,
                    old = old.as_str(),
                    new = status.as_str(),
                    "interface status changed"
                );
                if let Some(tx) = &inner.events_tx {
                    if tx
                        .try_send(StatusChange {
                            if_name: name.clone(),
                            old,
                            new: status,
                        })
                        .is_err()
                    {
                        warn!(iface = %name, "status-change event queue full; dropping event");
                    }
                }
            }
        }

        // Wait out the rest of the interval, or leave early on shutdown.
        loop {
            if !state.checks_ongoing {
                return;
            }
            let now = Instant::now();
            if now >= next_check {
                break;
            }
            let (guard, _timed_out) = shared
                .checks_loop_cond
                .wait_timeout(state, next_check - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }
}

/// A panicking probe must not take the loop down; it reports UNKNOWN.
fn run_probe(prober: &dyn Prober, iface: &str) -> LinkStatus {
    match panic::catch_unwind(AssertUnwindSafe(|| prober.probe(iface))) {
        Ok(status) => status,
        Err(_) => {
            error!(iface = %iface, "probe panicked; reporting UNKNOWN");
            LinkStatus::Unknown
        }
    }
}

fn spawn_dispatcher(
    rx: Receiver<StatusChange>,
    listener: Arc<Mutex<Option<StatusChangeListener>>>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("health-events".into())
        .spawn(move || {
            for event in rx.iter() {
                let cb = listener.lock().unwrap_or_else(|e| e.into_inner()).clone();
                if let Some(cb) = cb {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        cb(&event.if_name, event.old, event.new)
                    }));
                    if result.is_err() {
                        error!(iface = %event.if_name, "status-change listener panicked");
                    }
                }
            }
        })
        .expect("failed to spawn health event dispatcher")
}
