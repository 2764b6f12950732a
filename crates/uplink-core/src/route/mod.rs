//! Kernel routing-table access and default-gateway management.

mod ioctl;
mod manager;
mod table;

pub use manager::{GatewayChangeListener, RouteManager};
pub use table::{ProcRouteTable, RouteEntry, RouteError, RouteTable};
