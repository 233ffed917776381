//! Protrans - keeps a Transmission peer port in sync with a NAT-PMP mapping
//!
//! This library polls a NAT-PMP gateway for port mappings and pushes the
//! mapped port into a Transmission daemon's session configuration, verifying
//! connectivity afterwards.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod natpmp;
pub mod port_sync;
pub mod transmission;

#[cfg(test)]
mod tests;

use natpmp::MappingError;
use tracing_subscriber::filter::LevelFilter;
use transmission::RpcError;

/// Result type alias for Protrans operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Protrans operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The NAT gateway did not answer an external address request
    #[error("NAT gateway is not reachable: {0}")]
    GatewayUnreachable(#[source] MappingError),

    /// The NAT gateway refused or failed a port mapping request
    #[error("Port mapping unavailable: {0}")]
    MappingUnavailable(#[source] MappingError),

    /// The Transmission daemon could not be reached
    #[error("Transmission session is not reachable: {0}")]
    SessionUnreachable(#[source] RpcError),

    /// The Transmission daemon rejected a peer port
    #[error("Invalid peer port {port}: {reason}")]
    InvalidPortValue {
        /// Port that was refused
        port: u16,
        /// Reason reported for the refusal
        reason: String,
    },

    /// Any other Transmission RPC failure, passed through unchanged
    #[error("Transmission RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Classify a session transport failure, separating "daemon not there"
    /// from every other RPC error.
    pub fn from_rpc(err: RpcError) -> Self {
        if err.is_unreachable() {
            Error::SessionUnreachable(err)
        } else {
            Error::Rpc(err)
        }
    }
}

/// Initialize logging with the given maximum level
pub fn init(level: LevelFilter) {
    tracing_subscriber::fmt().with_max_level(level).init();
}
