//! Protrans daemon
//!
//! Keeps Transmission's peer port in sync with a NAT-PMP mapping until
//! interrupted.

use anyhow::Context;
use clap::Parser;
use protrans::config::Config;
use protrans::natpmp::client::NATPMP_TIMEOUT;
use protrans::natpmp::{NatGateway, NatPmpClient};
use protrans::port_sync::{PortSync, SyncSettings};
use protrans::transmission::{TransmissionRpcClient, TransmissionSession};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "protrans", version, about)]
struct Args {
    /// YAML configuration file (defaults are used when omitted)
    config: Option<PathBuf>,

    /// Ignore PROTRANS_* environment variables
    #[arg(long)]
    no_env: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref(), !args.no_env)
        .context("Failed to load configuration")?;
    protrans::init(config.log_level.level_filter());

    match &args.config {
        Some(path) => info!("Parsed configuration from '{}'", path.display()),
        None => info!("Using default values"),
    }
    if !args.no_env {
        info!("Using environment variables");
    }
    for rejected in config.rejected() {
        warn!("Ignoring configuration value {}", rejected);
    }
    info!("Protrans version: {}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.log_level);
    info!("NAT configuration: {}", config.nat);
    info!("Transmission configuration: {}", config.transmission);

    let gateway = NatGateway::new(NatPmpClient::new(config.gateway_ip(), NATPMP_TIMEOUT));
    let rpc = TransmissionRpcClient::new(&config.transmission)
        .context("Failed to create Transmission client")?;
    let session = TransmissionSession::new(rpc);

    let cancel = CancellationToken::new();
    let settings = SyncSettings::new(u32::from(config.nat.port_lifetime));
    let sync = tokio::spawn(PortSync::new(gateway, session, settings, cancel.clone()).run());

    let signal = shutdown_signal().await?;
    info!("Received {}, leaving", signal);
    cancel.cancel();

    info!("Waiting for port sync to finish");
    sync.await.context("Port sync task failed")?;

    Ok(())
}

/// Wait for the first termination signal and return its name
#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            "SIGINT"
        }
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    };

    Ok(name)
}

/// Wait for the first termination signal and return its name
#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
