//! # Uplink failover engine
//!
//! Keeps a multi-homed host reachable by steering the kernel's default
//! IPv4 route toward the highest-preference healthy uplink.
//!
//! Three loops cooperate:
//!
//! - the [`health::HealthMonitor`] probes each uplink periodically and
//!   publishes debounced status changes,
//! - the [`route::RouteManager`] mirrors the kernel routing table, tracks
//!   the primary default gateway, and can atomically re-elect it,
//! - the [`policy::FailoverPolicy`] reacts to both event streams and
//!   decides when the primary must move.
//!
//! The [`facade::QueryFacade`] is the read-only view handed to whatever
//! control surface fronts the daemon. Probing ([`probe::Prober`]) and
//! kernel access ([`route::RouteTable`]) are injectable, so the whole
//! engine runs against fakes in tests.

pub mod config;
pub mod facade;
pub mod health;
pub mod policy;
pub mod probe;
pub mod route;
pub mod status;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{EngineConfig, ProbeConfig};
pub use facade::{IfaceStatusReport, QueryFacade};
pub use health::{HealthMonitor, StatusChangeListener};
pub use policy::FailoverPolicy;
pub use probe::{LinkStatus, PingProber, Prober};
pub use route::{GatewayChangeListener, ProcRouteTable, RouteEntry, RouteError, RouteManager, RouteTable};
pub use status::{ErrorCode, Status};
