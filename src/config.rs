//! Configuration snapshot for the daemon
//!
//! Values come from built-in defaults, then an optional YAML file, then
//! environment variables (field by field). The result is immutable for the
//! lifetime of the port-sync loop.
//!
//! Loading happens before logging is set up, so values that are rejected
//! along the way are collected on the snapshot (see [`Config::rejected`])
//! and reported by the caller once a subscriber exists.
//!
//! # Example
//! ```rust,no_run
//! use protrans::config::Config;
//!
//! let config = Config::load(Some("protrans.yaml".as_ref()), true).expect("Failed to load");
//! println!("Gateway: {}", config.gateway_ip());
//! ```

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;

/// Gateway used when none is configured or the configured one is invalid
pub const DEFAULT_GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 2, 0, 1);

/// Default NAT-PMP mapping lifetime in seconds
pub const DEFAULT_PORT_LIFETIME: u16 = 120;

/// Default Transmission RPC port
pub const DEFAULT_TRANSMISSION_PORT: u16 = 9091;

/// Log verbosity, as written in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Most verbose
    Trace,
    /// Debug output
    Debug,
    /// Informational (default)
    #[default]
    Info,
    /// Warnings and above
    Warn,
    /// Errors only
    Error,
    /// Fatal errors only
    Fatal,
    /// Panics only
    Panic,
}

impl LogLevel {
    /// Maximum tracing level for this log level.
    ///
    /// Tracing has no levels above ERROR, so FATAL and PANIC collapse into it.
    pub fn level_filter(&self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::TRACE,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error | Self::Fatal | Self::Panic => LevelFilter::ERROR,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Panic => "PANIC",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            "PANIC" => Ok(Self::Panic),
            other => Err(Error::Config(format!("Unknown log level: {}", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for the Transmission daemon
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    /// Host running the daemon
    pub host: String,
    /// RPC port
    pub port: u16,
    /// RPC username (empty = no authentication)
    pub username: String,
    /// RPC password
    pub password: String,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_TRANSMISSION_PORT,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl fmt::Display for TransmissionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() { "not set" } else { "set" };
        write!(
            f,
            "Transmission{{Host={:?} Port={} Username={:?} Password={:?}}}",
            self.host, self.port, self.username, password
        )
    }
}

/// NAT-PMP gateway settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatConfig {
    /// Gateway address as a dotted quad
    pub gateway: String,
    /// Requested mapping lifetime in seconds
    pub port_lifetime: u16,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            gateway: DEFAULT_GATEWAY.to_string(),
            port_lifetime: DEFAULT_PORT_LIFETIME,
        }
    }
}

impl fmt::Display for NatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Nat{{Gateway={:?} PortLifetime={}}}",
            self.gateway, self.port_lifetime
        )
    }
}

/// A configuration value that was rejected and replaced by a fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedValue {
    /// Environment variable or file key holding the value
    pub name: String,
    /// What was wrong and what is used instead
    pub reason: String,
}

impl fmt::Display for RejectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Complete configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "FileConfig")]
pub struct Config {
    /// Transmission daemon settings
    pub transmission: TransmissionConfig,
    /// NAT gateway settings
    pub nat: NatConfig,
    /// Log verbosity
    pub log_level: LogLevel,
    rejected: Vec<RejectedValue>,
}

/// Configuration as written in the YAML file, before validation
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    transmission: TransmissionConfig,
    nat: NatConfig,
    log_level: Option<String>,
}

impl From<FileConfig> for Config {
    fn from(file: FileConfig) -> Self {
        let mut config = Config {
            transmission: file.transmission,
            nat: file.nat,
            ..Default::default()
        };

        if let Some(level) = file.log_level {
            if let Err(e) = set_log_level(&mut config, &level) {
                config.reject("log_level", format!("{}, using {}", e, LogLevel::default()));
            }
        }

        if config.nat.port_lifetime == 0 {
            config.nat.port_lifetime = DEFAULT_PORT_LIFETIME;
            config.reject(
                "nat.port_lifetime",
                format!("Lifetime must be positive, using {}", DEFAULT_PORT_LIFETIME),
            );
        }

        config
    }
}

/// Applies a raw environment value to a configuration field
type Setter = fn(&mut Config, &str) -> Result<()>;

/// Environment variables recognised as overrides, with their setters
const ENV_OVERRIDES: &[(&str, Setter)] = &[
    ("PROTRANS_LOG_LEVEL", set_log_level),
    ("PROTRANS_TRANSMISSION_HOST", set_transmission_host),
    ("PROTRANS_TRANSMISSION_PORT", set_transmission_port),
    ("PROTRANS_TRANSMISSION_USERNAME", set_transmission_username),
    ("PROTRANS_TRANSMISSION_PASSWORD", set_transmission_password),
    ("PROTRANS_NAT_GATEWAY", set_nat_gateway),
    ("PROTRANS_NAT_PORT_LIFETIME", set_nat_port_lifetime),
];

fn set_log_level(config: &mut Config, value: &str) -> Result<()> {
    config.log_level = value.parse()?;
    Ok(())
}

fn set_transmission_host(config: &mut Config, value: &str) -> Result<()> {
    config.transmission.host = value.to_string();
    Ok(())
}

fn set_transmission_port(config: &mut Config, value: &str) -> Result<()> {
    config.transmission.port = parse_u16(value)?;
    Ok(())
}

fn set_transmission_username(config: &mut Config, value: &str) -> Result<()> {
    config.transmission.username = value.to_string();
    Ok(())
}

fn set_transmission_password(config: &mut Config, value: &str) -> Result<()> {
    config.transmission.password = value.to_string();
    Ok(())
}

fn set_nat_gateway(config: &mut Config, value: &str) -> Result<()> {
    config.nat.gateway = value.to_string();
    Ok(())
}

fn set_nat_port_lifetime(config: &mut Config, value: &str) -> Result<()> {
    // A zero lifetime asks the gateway to delete the mapping
    match parse_u16(value)? {
        0 => Err(Error::Config("Lifetime must be positive".to_string())),
        lifetime => {
            config.nat.port_lifetime = lifetime;
            Ok(())
        }
    }
}

fn parse_u16(value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid number {:?}: {}", value, e)))
}

impl Config {
    /// Build the configuration snapshot
    ///
    /// # Arguments
    /// * `path` - Optional YAML file; missing fields keep their defaults
    /// * `use_environment` - Whether `PROTRANS_*` variables override the file
    ///
    /// # Returns
    /// The merged configuration, or an error if the file cannot be read or parsed
    pub fn load(path: Option<&Path>, use_environment: bool) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if use_environment {
            config.apply_env_with(|name| std::env::var(name).ok());
        }

        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        Self::from_yaml(&data)
    }

    /// Parse configuration from YAML text (empty text yields the defaults)
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_yaml::from_str(data)?)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Values that cannot be parsed keep the previous value and are
    /// recorded in [`Config::rejected`].
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (name, setter) in ENV_OVERRIDES {
            let Some(value) = lookup(name) else {
                continue;
            };

            if let Err(e) = setter(self, &value) {
                self.reject(name, format!("{}, keeping previous value", e));
            }
        }
    }

    /// Values rejected while building this snapshot, in the order found
    pub fn rejected(&self) -> &[RejectedValue] {
        &self.rejected
    }

    fn reject(&mut self, name: &str, reason: String) {
        self.rejected.push(RejectedValue {
            name: name.to_string(),
            reason,
        });
    }

    /// Gateway address, falling back to [`DEFAULT_GATEWAY`] when unparsable
    pub fn gateway_ip(&self) -> Ipv4Addr {
        match self.nat.gateway.trim().parse() {
            Ok(ip) => ip,
            Err(e) => {
                warn!(
                    "Could not parse NAT gateway IP '{}': {}, using default value",
                    self.nat.gateway, e
                );
                DEFAULT_GATEWAY
            }
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Protrans{{LogLevel={:?} {} {}}}",
            self.log_level.as_str(),
            self.nat,
            self.transmission
        )
    }
}
