//! Transmission RPC transport
//!
//! JSON requests over HTTP POST to `/transmission/rpc`. The daemon protects
//! against CSRF with a session id: a request without the current id is
//! answered with `409 Conflict` carrying a fresh `X-Transmission-Session-Id`,
//! and the request is retried once with it.

use crate::config::TransmissionConfig;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Header carrying the CSRF session id
pub const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

/// Path of the RPC endpoint on the daemon
pub const RPC_PATH: &str = "/transmission/rpc";

/// Timeout for a single RPC round-trip
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// `result` value of a successful call
const RESULT_SUCCESS: &str = "success";

/// Errors that can occur during an RPC call
#[derive(Debug, Error)]
pub enum RpcError {
    /// HTTP transport failure (connection refused, timeout, decoding, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with an unexpected HTTP status
    #[error("Unexpected HTTP status: {0}")]
    Status(StatusCode),

    /// The daemon kept refusing the session id
    #[error("Session id handshake failed")]
    SessionId,

    /// The call reached the daemon but its `result` was not `success`
    #[error("RPC call failed: {0}")]
    Rpc(String),

    /// The response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The endpoint could not be built from the configuration
    #[error("Invalid RPC endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RpcError {
    /// Whether the daemon could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Subset of `session-stats` the daemon reports
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStats {
    /// Torrents currently active
    pub active_torrent_count: u32,
    /// Torrents currently paused
    pub paused_torrent_count: u32,
    /// All torrents
    pub torrent_count: u32,
    /// Download speed in bytes/s
    pub download_speed: u64,
    /// Upload speed in bytes/s
    pub upload_speed: u64,
}

/// Session arguments read or written by this crate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SessionArguments {
    /// Inbound peer port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_port: Option<u16>,
}

/// Raw Transmission RPC methods
#[async_trait]
pub trait SessionRpc: Send + Sync {
    /// `session-stats`
    async fn session_stats(&self) -> Result<SessionStats, RpcError>;

    /// `port-test`: whether the daemon sees its peer port as open
    async fn port_test(&self) -> Result<bool, RpcError>;

    /// `session-get`
    async fn session_get(&self) -> Result<SessionArguments, RpcError>;

    /// `session-set`
    async fn session_set(&self, arguments: &SessionArguments) -> Result<(), RpcError>;
}

/// Request envelope
#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest<'a> {
    pub method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
    pub tag: u64,
}

/// Response envelope
#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse {
    pub result: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Unwrap a response envelope, turning a non-success `result` into an error
pub(crate) fn parse_rpc_response(body: &str) -> Result<Value, RpcError> {
    let response: RpcResponse = serde_json::from_str(body)
        .map_err(|e| RpcError::InvalidResponse(format!("Malformed JSON: {}", e)))?;

    if response.result != RESULT_SUCCESS {
        return Err(RpcError::Rpc(response.result));
    }

    Ok(response.arguments)
}

/// Decode the `arguments` of a response into `T`
pub(crate) fn decode_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, RpcError> {
    // Some daemons omit `arguments` entirely when there is nothing to report
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };

    serde_json::from_value(arguments)
        .map_err(|e| RpcError::InvalidResponse(format!("Unexpected arguments: {}", e)))
}

/// Transmission RPC client over HTTP
#[derive(Debug)]
pub struct TransmissionRpcClient {
    http: reqwest::Client,
    url: Url,
    credentials: Option<(String, String)>,
    session_id: Mutex<Option<String>>,
    tag: AtomicU64,
}

impl TransmissionRpcClient {
    /// Create a client from the daemon's configuration
    ///
    /// # Errors
    /// Fails when the host does not form a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(config: &TransmissionConfig) -> Result<Self, RpcError> {
        // IPv6 literals need brackets inside a URL authority
        let host = if config.host.contains(':') && !config.host.starts_with('[') {
            format!("[{}]", config.host)
        } else {
            config.host.clone()
        };

        let url = Url::parse(&format!("http://{}:{}{}", host, config.port, RPC_PATH))
            .map_err(|e| RpcError::InvalidEndpoint(format!("{}:{}: {}", config.host, config.port, e)))?;

        let credentials = if config.username.is_empty() {
            None
        } else {
            Some((config.username.clone(), config.password.clone()))
        };

        Self::with_url(url, credentials)
    }

    /// Create a client for an explicit endpoint
    pub fn with_url(url: Url, credentials: Option<(String, String)>) -> Result<Self, RpcError> {
        // The daemon lives on the LAN; never route it through a proxy
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .no_proxy()
            .build()?;

        Ok(Self {
            http,
            url,
            credentials,
            session_id: Mutex::new(None),
            tag: AtomicU64::new(1),
        })
    }

    /// Endpoint requests are sent to
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Perform one RPC call, handling the session id handshake
    async fn call(&self, method: &str, arguments: Value) -> Result<Value, RpcError> {
        let request = RpcRequest {
            method,
            arguments,
            tag: self.tag.fetch_add(1, Ordering::Relaxed),
        };

        // First attempt may be refused with a fresh session id; retry once
        for _ in 0..2 {
            let mut builder = self.http.post(self.url.clone()).json(&request);
            if let Some((username, password)) = &self.credentials {
                builder = builder.basic_auth(username, Some(password));
            }
            if let Some(id) = self.session_id.lock().await.as_deref() {
                builder = builder.header(SESSION_ID_HEADER, id);
            }

            trace!("Sending RPC {} (tag {})", method, request.tag);
            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::CONFLICT {
                let id = response
                    .headers()
                    .get(SESSION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(RpcError::SessionId)?;
                debug!("Transmission issued a new session id");
                *self.session_id.lock().await = Some(id.to_string());
                continue;
            }

            if !status.is_success() {
                return Err(RpcError::Status(status));
            }

            let body = response.text().await?;
            return parse_rpc_response(&body);
        }

        Err(RpcError::SessionId)
    }
}

#[async_trait]
impl SessionRpc for TransmissionRpcClient {
    async fn session_stats(&self) -> Result<SessionStats, RpcError> {
        let arguments = self.call("session-stats", Value::Null).await?;
        decode_arguments(arguments)
    }

    async fn port_test(&self) -> Result<bool, RpcError> {
        #[derive(Deserialize)]
        struct PortTest {
            #[serde(rename = "port-is-open", default)]
            port_is_open: bool,
        }

        let arguments = self.call("port-test", Value::Null).await?;
        let result: PortTest = decode_arguments(arguments)?;
        Ok(result.port_is_open)
    }

    async fn session_get(&self) -> Result<SessionArguments, RpcError> {
        let arguments = self
            .call("session-get", serde_json::json!({ "fields": ["peer-port"] }))
            .await?;
        decode_arguments(arguments)
    }

    async fn session_set(&self, arguments: &SessionArguments) -> Result<(), RpcError> {
        let arguments = serde_json::to_value(arguments)
            .map_err(|e| RpcError::InvalidResponse(format!("Unencodable arguments: {}", e)))?;
        self.call("session-set", arguments).await?;
        Ok(())
    }
}
