//! Uplink failover daemon.
//!
//! Long-running agent for hosts with several uplinks. It probes each
//! uplink's reachability, mirrors the kernel routing table, and keeps the
//! lowest-metric default route on the most preferred healthy interface.
//! A small HTTP API exposes the engine state and a manual override.

use std::future::IntoFuture;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use uplink_agent::api;
use uplink_agent::config::{AgentConfig, Overrides};
use uplink_core::{
    FailoverPolicy, HealthMonitor, PingProber, ProcRouteTable, QueryFacade, RouteManager,
};

/// Uplink failover daemon.
#[derive(Parser, Debug)]
#[command(name = "uplink-agent", about = "Keeps the default route on the best healthy uplink")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interfaces to monitor (comma-separated), e.g. `eth1,usb0`.
    #[arg(long, value_delimiter = ',')]
    interfaces: Vec<String>,

    /// Gateway preference order (comma-separated, highest first).
    /// Defaults to the monitored interface order.
    #[arg(long, value_delimiter = ',')]
    preference: Vec<String>,

    /// Control API listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Off-host address pinged through each uplink.
    #[arg(long)]
    probe_anchor: Option<Ipv4Addr>,

    /// Seconds between health checks of each interface.
    #[arg(long)]
    health_check_interval: Option<f64>,

    /// Seconds between routing-table syncs.
    #[arg(long)]
    route_sync_interval: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    config.apply(Overrides {
        interfaces: cli.interfaces,
        preference: cli.preference,
        listen: cli.listen,
        probe_anchor: cli.probe_anchor,
        health_check_interval: cli.health_check_interval,
        route_sync_interval: cli.route_sync_interval,
    });

    if config.engine.monitored_interfaces.is_empty() {
        anyhow::bail!("no interfaces to monitor; pass --interfaces or set monitored_interfaces");
    }
    let validation = config.engine.validate();
    if !validation.is_ok() {
        anyhow::bail!("invalid configuration: {validation}");
    }

    tracing::info!(
        interfaces = ?config.engine.monitored_interfaces,
        preference = ?config.engine.preference_order,
        listen = %config.listen_addr,
        "uplink-agent starting"
    );

    // ── Engine ──────────────────────────────────────────────────
    let prober = Arc::new(PingProber::new(config.engine.probe.clone()));
    let monitor = Arc::new(HealthMonitor::new(
        &config.engine.monitored_interfaces,
        prober,
        config.engine.health_check_interval(),
    ));
    let routes = Arc::new(RouteManager::new(
        Arc::new(ProcRouteTable),
        config.engine.route_sync_interval(),
    ));
    let policy = FailoverPolicy::new(monitor.clone(), routes.clone());
    policy.set_preferred_gateway_interfaces(&config.engine.preference_order);

    tracing::info!("starting the interface checks");
    monitor.start_checks();
    routes.start_checks();
    routes.sync_now();
    match routes.primary_default_gw_interface() {
        Some(gw) => tracing::info!(gateway = %gw, "current default interface"),
        None => tracing::warn!("no default interface"),
    }

    // ── Control API ─────────────────────────────────────────────
    let facade = Arc::new(QueryFacade::new(routes.clone(), monitor.clone()));
    let app = api::router(facade);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("control API listening on {}", config.listen_addr);
    let server = axum::serve(listener, app).into_future();

    // ── Shutdown handling ───────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = server => {
            if let Err(e) = result {
                tracing::error!("control API failed: {e}");
            }
        }
    }

    routes.stop_checks();
    monitor.stop_checks();
    tracing::info!("uplink-agent stopped");
    Ok(())
}
