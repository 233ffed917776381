//! Common types for the NAT-PMP module

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Result of an external address request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalAddress {
    /// Seconds since the gateway's port-mapping table was initialized
    pub epoch_secs: u32,
    /// Raw external address bytes, network order
    pub address: [u8; 4],
}

impl ExternalAddress {
    /// External address as an IPv4 address (displays as a dotted quad)
    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.address)
    }
}

/// Result of a port mapping request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    /// Seconds since the gateway's port-mapping table was initialized
    pub epoch_secs: u32,
    /// Internal port the gateway mapped
    pub internal_port: u16,
    /// External port mapped on the gateway
    pub external_port: u16,
    /// Lifetime granted by the gateway, in seconds
    pub lifetime_secs: u32,
}

/// Errors that can occur while talking to the gateway
#[derive(Debug, Error)]
pub enum MappingError {
    /// Network timeout waiting for response
    #[error("Request to gateway timed out")]
    Timeout,

    /// Invalid response from gateway
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Gateway returned an error
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// IO error during communication
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport protocol of a mapping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    /// TCP protocol
    TCP,
    /// UDP protocol
    UDP,
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TCP => f.write_str("tcp"),
            Self::UDP => f.write_str("udp"),
        }
    }
}
