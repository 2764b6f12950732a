//! Scripted fakes shared by the unit tests.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::probe::{LinkStatus, Prober};
use crate::route::{RouteEntry, RouteError, RouteTable};

/// Prober whose verdicts are set by the test.
///
/// Interfaces without a scripted status probe as UNKNOWN, mimicking a
/// probe that cannot complete.
pub(crate) struct ScriptedProber {
    statuses: Mutex<HashMap<String, LinkStatus>>,
}

impl ScriptedProber {
    pub(crate) fn new() -> Self {
        ScriptedProber {
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn set(&self, iface: &str, status: LinkStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(iface.to_string(), status);
    }

    pub(crate) fn clear(&self, iface: &str) {
        self.statuses.lock().unwrap().remove(iface);
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

/// One recorded kernel write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KernelOp {
    Add {
        if_name: String,
        metric: i32,
        gw: Ipv4Addr,
    },
    Delete {
        if_name: String,
        metric: i32,
        gw: Ipv4Addr,
    },
}

/// In-memory routing table recording every write.
///
/// Writes are applied to the stored entries with the kernel's metric
/// bias: a route added with (kernel) metric `m` reads back as `m - 1`,
/// exactly as `/proc/net/route` would show it.
pub(crate) struct FakeRouteTable {
    entries: Mutex<Vec<RouteEntry>>,
    ops: Mutex<Vec<KernelOp>>,
    fail_reads: Mutex<bool>,
}

impl FakeRouteTable {
    pub(crate) fn new(entries: Vec<RouteEntry>) -> Self {
        FakeRouteTable {
            entries: Mutex::new(entries),
            ops: Mutex::new(Vec::new()),
            fail_reads: Mutex::new(false),
        }
    }

    pub(crate) fn ops(&self) -> Vec<KernelOp> {
        self.ops.lock().unwrap().clone()
    }

    pub(crate) fn set_entries(&self, entries: Vec<RouteEntry>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }
}

pub(crate) fn default_route(if_name: &str, gw: Ipv4Addr, metric: i32) -> RouteEntry {
    RouteEntry {
        if_name: if_name.to_string(),
        dst: Ipv4Addr::UNSPECIFIED,
        gw,
        metric,
    }
}

impl RouteTable for FakeRouteTable {
    fn read_entries(&self) -> Result<Vec<RouteEntry>, RouteError> {
        if *self.fail_reads.lock().unwrap() {
            return Err(RouteError::Read {
                path: "/proc/net/route".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "scripted failure"),
            });
        }
        Ok(self.entries.lock().unwrap().clone())
    }

    fn add_default_route(
        &self,
        if_name: &str,
        metric: i32,
        gw: Ipv4Addr,
    ) -> Result<(), RouteError> {
        self.ops.lock().unwrap().push(KernelOp::Add {
            if_name: if_name.to_string(),
            metric,
            gw,
        });
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
        self.ops.lock().unwrap().push(KernelOp::Delete {
            if_name: if_name.to_string(),
            metric,
            gw,
        });
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|e| {
            e.is_default() && e.if_name == if_name && e.metric == metric - 1 && e.gw == gw
        }) {
            entries.remove(pos);
        }
        Ok(())
    }
}
