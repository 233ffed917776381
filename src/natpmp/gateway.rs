//! Gateway adapter used by the port-sync loop
//!
//! Wraps a [`NatPmpTransport`] and collapses its failures into the two
//! domain errors the loop reacts to: [`Error::GatewayUnreachable`] and
//! [`Error::MappingUnavailable`].

use super::client::NatPmpTransport;
use super::types::IpProtocol;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use tracing::debug;

/// Internal port sent with every mapping request; the gateway picks it
const ANY_INTERNAL_PORT: u16 = 0;

/// Suggested external port: the first one available
const FIRST_AVAILABLE_EXTERNAL_PORT: u16 = 1;

/// Operations the port-sync loop needs from a NAT gateway
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Current external address of the gateway
    async fn get_external_address(&self) -> Result<Ipv4Addr>;

    /// Request an external port for `protocol`, valid for `lifetime_secs`.
    ///
    /// TCP and UDP are requested independently; comparing the two results
    /// is the caller's job.
    async fn add_port_mapping(&self, protocol: IpProtocol, lifetime_secs: u32) -> Result<u16>;
}

/// [`Gateway`] backed by a NAT-PMP transport
#[derive(Debug, Clone)]
pub struct NatGateway<T> {
    transport: T,
}

impl<T: NatPmpTransport> NatGateway<T> {
    /// Wrap a raw transport
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: NatPmpTransport> Gateway for NatGateway<T> {
    async fn get_external_address(&self) -> Result<Ipv4Addr> {
        let address = self
            .transport
            .external_address()
            .await
            .map_err(Error::GatewayUnreachable)?;

        Ok(address.ip())
    }

    async fn add_port_mapping(&self, protocol: IpProtocol, lifetime_secs: u32) -> Result<u16> {
        let mapping = self
            .transport
            .map_port(
                protocol,
                ANY_INTERNAL_PORT,
                FIRST_AVAILABLE_EXTERNAL_PORT,
                lifetime_secs,
            )
            .await
            .map_err(Error::MappingUnavailable)?;

        debug!(
            "Gateway mapped {} port {} (lifetime: {}s)",
            protocol, mapping.external_port, mapping.lifetime_secs
        );

        Ok(mapping.external_port)
    }
}
