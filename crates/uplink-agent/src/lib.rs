//! Library surface of the uplink agent: configuration loading and the
//! HTTP control API router, split out so the API tests can drive the
//! router without a running daemon.

pub mod api;
pub mod config;
