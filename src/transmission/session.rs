//! Session adapter used by the port-sync loop
//!
//! Connectivity probes (`is_connected`, `is_port_open`) swallow transport
//! errors and answer `false`; reads and writes of the peer port surface them.

use super::rpc::{RpcError, SessionArguments, SessionRpc};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::trace;

/// Operations the port-sync loop needs from the torrent daemon
#[async_trait]
pub trait Session: Send + Sync {
    /// Whether a lightweight statistics query succeeds
    async fn is_connected(&self) -> bool;

    /// Whether the daemon reports its peer port as reachable from outside
    async fn is_port_open(&self) -> bool;

    /// Peer port currently configured on the daemon
    async fn get_current_port(&self) -> Result<u16>;

    /// Configure a new peer port on the daemon
    async fn set_peer_port(&self, port: u16) -> Result<()>;
}

/// [`Session`] backed by a Transmission RPC transport
#[derive(Debug)]
pub struct TransmissionSession<R> {
    rpc: R,
}

impl<R: SessionRpc> TransmissionSession<R> {
    /// Wrap a raw transport
    pub fn new(rpc: R) -> Self {
        Self { rpc }
    }

    /// Underlying transport
    pub fn rpc(&self) -> &R {
        &self.rpc
    }
}

#[async_trait]
impl<R: SessionRpc> Session for TransmissionSession<R> {
    async fn is_connected(&self) -> bool {
        match self.rpc.session_stats().await {
            Ok(_) => true,
            Err(e) => {
                trace!("session-stats failed: {}", e);
                false
            }
        }
    }

    async fn is_port_open(&self) -> bool {
        match self.rpc.port_test().await {
            Ok(open) => open,
            Err(e) => {
                trace!("port-test failed: {}", e);
                false
            }
        }
    }

    async fn get_current_port(&self) -> Result<u16> {
        let arguments = self.rpc.session_get().await.map_err(Error::from_rpc)?;

        arguments.peer_port.ok_or_else(|| {
            Error::Rpc(RpcError::InvalidResponse(
                "session-get did not report peer-port".to_string(),
            ))
        })
    }

    async fn set_peer_port(&self, port: u16) -> Result<()> {
        if port == 0 {
            return Err(Error::InvalidPortValue {
                port,
                reason: "port 0 cannot accept peers".to_string(),
            });
        }

        let arguments = SessionArguments {
            peer_port: Some(port),
        };

        self.rpc
            .session_set(&arguments)
            .await
            .map_err(|e| match e {
                RpcError::Rpc(reason) => Error::InvalidPortValue { port, reason },
                other => Error::from_rpc(other),
            })
    }
}
