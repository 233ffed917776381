//! NAT-PMP gateway access
//!
//! This module provides port mapping through a NAT-PMP (RFC 6886) gateway:
//! - `client` - the raw UDP transport (packet encoding, timeouts)
//! - `gateway` - the adapter the port-sync loop talks to
//!
//! The adapter reports only two failure kinds, gateway unreachable and
//! mapping unavailable; the transport keeps the wire-level detail.

// Submodules
pub mod client;
pub mod gateway;
pub mod types;

// Re-export commonly used types
pub use types::{ExternalAddress, IpProtocol, MappingError, PortMapping};

// Re-export clients
pub use client::{NatPmpClient, NatPmpTransport};
pub use gateway::{Gateway, NatGateway};
