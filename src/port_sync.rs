//! Port-sync loop
//!
//! Keeps the daemon's peer port consistent with the NAT-PMP mapping. Each
//! wake checks the cheap, local session first and only talks to the gateway
//! when the daemon is reachable but its port is closed:
//!
//! 1. session down -> nothing to do, short interval
//! 2. port already open -> nothing to do, interval grows toward the lease
//! 3. port closed -> external address, TCP mapping, UDP mapping, compare,
//!    write the port, wait for the daemon to settle, verify
//!
//! Any failure ends the cycle and the next wake happens after the default
//! interval. Nothing is retried within a cycle.
//!
//! # Example
//!
//! ```no_run
//! use protrans::natpmp::{NatGateway, NatPmpClient};
//! use protrans::port_sync::{PortSync, SyncSettings};
//! use protrans::transmission::{TransmissionRpcClient, TransmissionSession};
//! use protrans::config::Config;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let gateway = NatGateway::new(NatPmpClient::new(config.gateway_ip(), Duration::from_secs(2)));
//! let session = TransmissionSession::new(TransmissionRpcClient::new(&config.transmission)?);
//! let cancel = CancellationToken::new();
//!
//! let sync = PortSync::new(gateway, session, SyncSettings::new(120), cancel.clone());
//! let task = tokio::spawn(sync.run());
//!
//! cancel.cancel();
//! task.await?;
//! # Ok(())
//! # }
//! ```

use crate::natpmp::{Gateway, IpProtocol};
use crate::transmission::Session;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polling interval whenever there is something left to fix
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Wait after a port write before asking the daemon to test it
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Share of the mapping lifetime after which an open port is re-checked
const REFRESH_NUMERATOR: u32 = 4;
const REFRESH_DENOMINATOR: u32 = 5;

/// Timing parameters of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Interval used after any failure and after a fresh write
    pub default_interval: Duration,
    /// Lifetime requested for each mapping, in seconds
    pub port_lifetime_secs: u32,
    /// Wait between a port write and its verification
    pub settle_delay: Duration,
}

impl SyncSettings {
    /// Default timings for the given mapping lifetime
    pub fn new(port_lifetime_secs: u32) -> Self {
        Self {
            default_interval: DEFAULT_INTERVAL,
            port_lifetime_secs,
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Longest interval allowed while the port stays open.
    ///
    /// 80% of the mapping lifetime, never below the default interval.
    pub fn refresh_ceiling(&self) -> Duration {
        let lifetime = Duration::from_secs(u64::from(self.port_lifetime_secs));
        let ceiling = lifetime * REFRESH_NUMERATOR / REFRESH_DENOMINATOR;
        ceiling.max(self.default_interval)
    }

    /// Interval to use after `current` when the port was confirmed open
    pub fn lengthen(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .clamp(self.default_interval, self.refresh_ceiling())
    }
}

/// How a single cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Shutdown was requested before the cycle could go on
    Cancelled,
    /// The daemon did not answer
    SessionDown,
    /// The daemon already reports its port as open
    PortOpen,
    /// The gateway did not report an external address
    GatewayUnreachable,
    /// The gateway refused a mapping for this protocol
    MappingFailed(IpProtocol),
    /// TCP and UDP were mapped to different external ports
    PortMismatch {
        /// External port of the TCP mapping
        tcp: u16,
        /// External port of the UDP mapping
        udp: u16,
    },
    /// The daemon refused the new port
    WriteFailed(u16),
    /// The port was written; `verified` tells if the daemon saw it open
    PortSet {
        /// Port written to the daemon
        port: u16,
        /// Whether the follow-up port test succeeded
        verified: bool,
    },
}

/// State owned by the loop between cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    /// Wait before the next cycle
    pub interval: Duration,
    /// Last external address reported by the gateway
    pub external_address: Option<Ipv4Addr>,
    /// Description of the last failure, cleared on success
    pub last_error: Option<String>,
}

/// The port-sync state machine
pub struct PortSync<G, S> {
    gateway: G,
    session: S,
    settings: SyncSettings,
    cancel: CancellationToken,
    state: LoopState,
}

impl<G: Gateway, S: Session> PortSync<G, S> {
    /// Create a loop; it stops once `cancel` is triggered
    pub fn new(gateway: G, session: S, settings: SyncSettings, cancel: CancellationToken) -> Self {
        Self {
            gateway,
            session,
            settings,
            cancel,
            state: LoopState {
                interval: settings.default_interval,
                external_address: None,
                last_error: None,
            },
        }
    }

    /// Current loop state
    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Run cycles until cancelled
    pub async fn run(mut self) {
        info!(
            "Starting port sync (lifetime: {}s, default interval: {}s)",
            self.settings.port_lifetime_secs,
            self.settings.default_interval.as_secs()
        );

        while !self.cancel.is_cancelled() {
            if self.run_cycle().await == CycleOutcome::Cancelled {
                break;
            }

            let interval = self.state.interval;
            debug!("Next refresh in {}s", interval.as_secs());

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        info!("Gracefully stopping port sync");
    }

    /// Run one cycle and update the refresh interval from its outcome
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.sync_once().await;

        match outcome {
            CycleOutcome::Cancelled => {}
            CycleOutcome::PortOpen => {
                self.state.interval = self.settings.lengthen(self.state.interval);
                self.state.last_error = None;
            }
            CycleOutcome::PortSet { .. } => {
                self.state.interval = self.settings.default_interval;
                self.state.last_error = None;
            }
            failure => {
                self.state.interval = self.settings.default_interval;
                self.state.last_error = Some(format!("{:?}", failure));
            }
        }

        outcome
    }

    async fn sync_once(&mut self) -> CycleOutcome {
        if !self.session.is_connected().await {
            debug!("Transmission is not connected, skipping this cycle");
            return CycleOutcome::SessionDown;
        }

        if self.session.is_port_open().await {
            match self.session.get_current_port().await {
                Ok(port) => debug!("Port {} is already open in Transmission, nothing to do", port),
                Err(e) => debug!("Port is already open, could not read it back: {}", e),
            }
            return CycleOutcome::PortOpen;
        }

        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let address = match self.gateway.get_external_address().await {
            Ok(address) => address,
            Err(e) => {
                warn!("{}", e);
                return CycleOutcome::GatewayUnreachable;
            }
        };

        if self.state.external_address != Some(address) {
            info!("External address is {}", address);
            self.state.external_address = Some(address);
        }

        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let tcp = match self.map(IpProtocol::TCP).await {
            Some(port) => port,
            None => return CycleOutcome::MappingFailed(IpProtocol::TCP),
        };
        let udp = match self.map(IpProtocol::UDP).await {
            Some(port) => port,
            None => return CycleOutcome::MappingFailed(IpProtocol::UDP),
        };

        if tcp != udp {
            error!("Ports differ in range: (tcp {}) and (udp {})", tcp, udp);
            return CycleOutcome::PortMismatch { tcp, udp };
        }

        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        if let Err(e) = self.session.set_peer_port(tcp).await {
            error!("Unable to set peer port {}: {}", tcp, e);
            return CycleOutcome::WriteFailed(tcp);
        }
        debug!("Port {} set, waiting {}s before checking it", tcp, self.settings.settle_delay.as_secs());

        let verified = tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("Shutdown requested, not verifying port {}", tcp);
                return CycleOutcome::PortSet { port: tcp, verified: false };
            }
            _ = sleep(self.settings.settle_delay) => self.session.is_port_open().await,
        };

        if verified {
            info!(
                "Successfully set port {} to Transmission and checked network connectivity",
                tcp
            );
        } else {
            warn!(
                "Set port {} to Transmission but was unable to check connectivity (the NAT may take some time to be recognised)",
                tcp
            );
        }

        CycleOutcome::PortSet { port: tcp, verified }
    }

    async fn map(&self, protocol: IpProtocol) -> Option<u16> {
        match self
            .gateway
            .add_port_mapping(protocol, self.settings.port_lifetime_secs)
            .await
        {
            Ok(port) => {
                debug!("Mapped {} port {}", protocol, port);
                Some(port)
            }
            Err(e) => {
                error!("Unable to create {} port mapping: {}", protocol, e);
                None
            }
        }
    }
}
