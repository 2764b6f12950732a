//! Reading and writing IPv4 routes.
//!
//! The kernel side is kept behind the [`RouteTable`] trait so the route
//! manager and the failover tests can run against an in-memory table.
//! The real implementation reads `/proc/net/route` and programs routes
//! with the legacy `SIOCADDRT`/`SIOCDELRT` ioctls.

use std::fmt;
use std::fs;
use std::net::Ipv4Addr;

use thiserror::Error;

use super::ioctl;

const PROC_ROUTE_PATH: &str = "/proc/net/route";

// Column offsets in /proc/net/route.
const IF_NAME_COLUMN: usize = 0;
const DST_ADDRESS_COLUMN: usize = 1;
const GW_ADDRESS_COLUMN: usize = 2;
const METRIC_COLUMN: usize = 6;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed routing entry {line:?}: {reason}")]
    Parse { line: String, reason: String },
    #[error("{op} failed for {if_name}: {source}")]
    Kernel {
        op: &'static str,
        if_name: String,
        #[source]
        source: std::io::Error,
    },
}

/// One row of the IPv4 routing table.
///
/// `metric` is the userspace value as shown by `/proc/net/route`; the
/// kernel stores one more than this for routes programmed over the ioctl
/// interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub if_name: String,
    pub dst: Ipv4Addr,
    pub gw: Ipv4Addr,
    pub metric: i32,
}

impl RouteEntry {
    /// Whether this entry is a default route (destination 0.0.0.0).
    pub fn is_default(&self) -> bool {
        self.dst.is_unspecified()
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "If: {} - Dst: {} - Gw: {} - Metric: {}",
            self.if_name, self.dst, self.gw, self.metric
        )
    }
}

/// The kernel routing table, as far as the engine is concerned.
pub trait RouteTable: Send + Sync {
    /// Produces an ordered snapshot of the IPv4 routing table.
    fn read_entries(&self) -> Result<Vec<RouteEntry>, RouteError>;

    /// Installs a default route. `metric` is the kernel-internal value,
    /// one above what `read_entries` reports for the same route.
    fn add_default_route(&self, if_name: &str, metric: i32, gw: Ipv4Addr)
        -> Result<(), RouteError>;

    /// Removes a default route; `metric` as in [`Self::add_default_route`].
    fn delete_default_route(
        &self,
        if_name: &str,
        metric: i32,
        gw: Ipv4Addr,
    ) -> Result<(), RouteError>;
}

/// [`RouteTable`] backed by `/proc/net/route` and the routing ioctls.
pub struct ProcRouteTable;

impl RouteTable for ProcRouteTable {
    fn read_entries(&self) -> Result<Vec<RouteEntry>, RouteError> {
        let contents = fs::read_to_string(PROC_ROUTE_PATH).map_err(|source| RouteError::Read {
            path: PROC_ROUTE_PATH.to_string(),
            source,
        })?;
        parse_route_table(&contents)
    }

    fn add_default_route(
        &self,
        if_name: &str,
        metric: i32,
        gw: Ipv4Addr,
    ) -> Result<(), RouteError> {
        ioctl::add_default_route(if_name, metric, gw).map_err(|source| RouteError::Kernel {
            op: "SIOCADDRT",
            if_name: if_name.to_string(),
            source,
        })
    }

    fn delete_default_route(
        &self,
        if_name: &str,
        metric: i32,
        gw: Ipv4Addr,
    ) -> Result<(), RouteError> {
        ioctl::delete_default_route(if_name, metric, gw).map_err(|source| RouteError::Kernel {
            op: "SIOCDELRT",
            if_name: if_name.to_string(),
            source,
        })
    }
}

/// Parses the full text of `/proc/net/route`.
///
/// The first line is a header. Rows are tab-separated; addresses appear
/// as the raw little-endian word rendered in hex.
pub fn parse_route_table(contents: &str) -> Result<Vec<RouteEntry>, RouteError> {
    let mut entries = Vec::new();
    for line in contents.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(parse_route_line(line)?);
    }
    Ok(entries)
}

fn parse_route_line(line: &str) -> Result<RouteEntry, RouteError> {
    let malformed = |reason: &str| RouteError::Parse {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let fields: Vec<&str> = line
        .split('\t')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() <= METRIC_COLUMN {
        return Err(malformed("too few columns"));
    }

    let dst = parse_hex_addr(fields[DST_ADDRESS_COLUMN])
        .ok_or_else(|| malformed("bad destination address"))?;
    let gw =
        parse_hex_addr(fields[GW_ADDRESS_COLUMN]).ok_or_else(|| malformed("bad gateway address"))?;
    let metric = fields[METRIC_COLUMN]
        .parse::<i32>()
        .map_err(|_| malformed("bad metric"))?;

    Ok(RouteEntry {
        if_name: fields[IF_NAME_COLUMN].to_string(),
        dst,
        gw,
        metric,
    })
}

fn parse_hex_addr(s: &str) -> Option<Ipv4Addr> {
    let word = u32::from_str_radix(s, 16).ok()?;
    Some(Ipv4Addr::from(word.to_le_bytes()))
}
