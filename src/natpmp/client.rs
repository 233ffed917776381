//! NAT-PMP (NAT Port Mapping Protocol) transport - RFC 6886
//!
//! NAT-PMP uses UDP on port 5351 to communicate with the gateway. It supports:
//! - External IP address requests
//! - UDP port mappings
//! - TCP port mappings
//!
//! # Example
//!
//! ```no_run
//! use protrans::natpmp::{IpProtocol, NatPmpClient, NatPmpTransport};
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NatPmpClient::new(Ipv4Addr::new(10, 2, 0, 1), Duration::from_secs(2));
//! let address = client.external_address().await?;
//! let mapping = client.map_port(IpProtocol::TCP, 0, 1, 120).await?;
//! println!("External address: {}:{}", address.ip(), mapping.external_port);
//! # Ok(())
//! # }
//! ```

use super::types::{ExternalAddress, IpProtocol, MappingError, PortMapping};
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

/// NAT-PMP server port (IANA assigned)
pub const NATPMP_SERVER_PORT: u16 = 5351;

/// NAT-PMP protocol version
pub(crate) const NATPMP_VERSION: u8 = 0;

/// Default timeout for NAT-PMP requests
pub const NATPMP_TIMEOUT: Duration = Duration::from_secs(2);

/// Offset added to a request opcode in the matching response
const RESPONSE_OPCODE_OFFSET: u8 = 128;

/// NAT-PMP opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum NatPmpOpcode {
    /// External address request
    ExternalAddress = 0,
    /// UDP port mapping
    MapUdp = 1,
    /// TCP port mapping
    MapTcp = 2,
}

impl NatPmpOpcode {
    pub(crate) fn for_protocol(protocol: IpProtocol) -> Self {
        match protocol {
            IpProtocol::UDP => Self::MapUdp,
            IpProtocol::TCP => Self::MapTcp,
        }
    }

    fn response(self) -> u8 {
        RESPONSE_OPCODE_OFFSET + self as u8
    }
}

/// NAT-PMP result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum NatPmpResultCode {
    Success = 0,
    UnsupportedVersion = 1,
    NotAuthorized = 2,
    NetworkFailure = 3,
    OutOfResources = 4,
    UnsupportedOpcode = 5,
}

impl NatPmpResultCode {
    pub(crate) fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::UnsupportedVersion),
            2 => Some(Self::NotAuthorized),
            3 => Some(Self::NetworkFailure),
            4 => Some(Self::OutOfResources),
            5 => Some(Self::UnsupportedOpcode),
            _ => None,
        }
    }

    pub(crate) fn to_error_message(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::UnsupportedVersion => "Unsupported NAT-PMP version",
            Self::NotAuthorized => "Not authorized/refused",
            Self::NetworkFailure => "Network failure",
            Self::OutOfResources => "Out of resources",
            Self::UnsupportedOpcode => "Unsupported opcode",
        }
    }
}

/// Raw NAT-PMP operations, one request/response exchange each
#[async_trait]
pub trait NatPmpTransport: Send + Sync {
    /// Ask the gateway for its external address
    async fn external_address(&self) -> Result<ExternalAddress, MappingError>;

    /// Ask the gateway to map `internal_port`, suggesting `suggested_external_port`
    async fn map_port(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        suggested_external_port: u16,
        lifetime_secs: u32,
    ) -> Result<PortMapping, MappingError>;
}

/// NAT-PMP client bound to a single gateway
#[derive(Debug, Clone)]
pub struct NatPmpClient {
    gateway: SocketAddr,
    timeout: Duration,
}

impl NatPmpClient {
    /// Create a client talking to `gateway` on the standard NAT-PMP port
    pub fn new(gateway: Ipv4Addr, timeout: Duration) -> Self {
        Self::with_server_addr(SocketAddrV4::new(gateway, NATPMP_SERVER_PORT).into(), timeout)
    }

    /// Create a client talking to an explicit server address
    pub fn with_server_addr(gateway: SocketAddr, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Gateway address requests are sent to
    pub fn gateway(&self) -> SocketAddr {
        self.gateway
    }

    /// Send one request and wait for a response from the gateway
    async fn exchange(&self, request: &[u8], buf: &mut [u8]) -> Result<usize, MappingError> {
        let bind_addr = if self.gateway.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.gateway).await?;

        socket.send(request).await?;
        debug!("Sent NAT-PMP request ({} bytes) to {}", request.len(), self.gateway);

        // A connected socket only delivers datagrams from the gateway
        let bytes_received = timeout(self.timeout, socket.recv(buf))
            .await
            .map_err(|_| MappingError::Timeout)??;

        debug!("Received {} bytes from NAT-PMP server", bytes_received);
        Ok(bytes_received)
    }
}

#[async_trait]
impl NatPmpTransport for NatPmpClient {
    async fn external_address(&self) -> Result<ExternalAddress, MappingError> {
        let request = build_natpmp_external_address_request();

        let mut response_buf = [0u8; 12]; // External address response is 12 bytes
        let bytes_received = self.exchange(&request, &mut response_buf).await?;

        parse_natpmp_external_address_response(&response_buf[..bytes_received])
    }

    async fn map_port(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        suggested_external_port: u16,
        lifetime_secs: u32,
    ) -> Result<PortMapping, MappingError> {
        let request =
            build_natpmp_map_request(internal_port, suggested_external_port, lifetime_secs, protocol);

        let mut response_buf = [0u8; 16]; // NAT-PMP response is 16 bytes
        let bytes_received = self.exchange(&request, &mut response_buf).await?;

        parse_natpmp_map_response(&response_buf[..bytes_received], protocol)
    }
}

/// Build a NAT-PMP external address request packet
pub(crate) fn build_natpmp_external_address_request() -> [u8; 2] {
    [NATPMP_VERSION, NatPmpOpcode::ExternalAddress as u8]
}

/// Build a NAT-PMP MAP request packet
pub(crate) fn build_natpmp_map_request(
    internal_port: u16,
    suggested_external_port: u16,
    lifetime_secs: u32,
    protocol: IpProtocol,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(12); // NAT-PMP MAP request is 12 bytes

    // Version (1 byte)
    request.push(NATPMP_VERSION);

    // Opcode (1 byte) - 1 for UDP, 2 for TCP
    request.push(NatPmpOpcode::for_protocol(protocol) as u8);

    // Reserved (2 bytes, must be zero)
    request.extend_from_slice(&[0u8; 2]);

    // Internal port (2 bytes, big-endian)
    request.extend_from_slice(&internal_port.to_be_bytes());

    // Suggested external port (2 bytes, big-endian)
    request.extend_from_slice(&suggested_external_port.to_be_bytes());

    // Requested lifetime (4 bytes, big-endian)
    request.extend_from_slice(&lifetime_secs.to_be_bytes());

    request
}

/// Validate the common 8-byte response header, returning the epoch field
fn parse_natpmp_header(response: &[u8], expected: NatPmpOpcode) -> Result<u32, MappingError> {
    let version = response[0];
    if version != NATPMP_VERSION {
        return Err(MappingError::InvalidResponse(format!(
            "Invalid version: {} (expected {})",
            version, NATPMP_VERSION
        )));
    }

    let opcode = response[1];
    if opcode < RESPONSE_OPCODE_OFFSET {
        return Err(MappingError::InvalidResponse(
            "Received request instead of response".to_string(),
        ));
    }
    if opcode != expected.response() {
        return Err(MappingError::InvalidResponse(format!(
            "Unexpected opcode: {} (expected {})",
            opcode,
            expected.response()
        )));
    }

    let result_code = u16::from_be_bytes([response[2], response[3]]);
    let result = NatPmpResultCode::from_u16(result_code).ok_or_else(|| {
        MappingError::InvalidResponse(format!("Unknown result code: {}", result_code))
    })?;

    if result != NatPmpResultCode::Success {
        return Err(MappingError::GatewayError(
            result.to_error_message().to_string(),
        ));
    }

    Ok(u32::from_be_bytes([response[4], response[5], response[6], response[7]]))
}

/// Parse a NAT-PMP external address response packet
pub(crate) fn parse_natpmp_external_address_response(
    response: &[u8],
) -> Result<ExternalAddress, MappingError> {
    if response.len() < 12 {
        return Err(MappingError::InvalidResponse(format!(
            "External IP response too short: {} bytes",
            response.len()
        )));
    }

    let epoch_secs = parse_natpmp_header(response, NatPmpOpcode::ExternalAddress)?;

    // External IP (bytes 8-11)
    let address = [response[8], response[9], response[10], response[11]];

    Ok(ExternalAddress { epoch_secs, address })
}

/// Parse a NAT-PMP MAP response packet
pub(crate) fn parse_natpmp_map_response(
    response: &[u8],
    protocol: IpProtocol,
) -> Result<PortMapping, MappingError> {
    if response.len() < 16 {
        return Err(MappingError::InvalidResponse(format!(
            "Response too short: {} bytes (expected 16)",
            response.len()
        )));
    }

    let epoch_secs = parse_natpmp_header(response, NatPmpOpcode::for_protocol(protocol))?;

    // Internal port (bytes 8-9), external port (bytes 10-11), lifetime (bytes 12-15)
    let internal_port = u16::from_be_bytes([response[8], response[9]]);
    let external_port = u16::from_be_bytes([response[10], response[11]]);
    let lifetime_secs = u32::from_be_bytes([response[12], response[13], response[14], response[15]]);

    Ok(PortMapping {
        epoch_secs,
        internal_port,
        external_port,
        lifetime_secs,
    })
}
