use crate::config::*;
use crate::Error;
use std::collections::HashMap;
use std::io::Write;
use std::net::Ipv4Addr;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::filter::LevelFilter;

/// Helper to build an environment lookup from pairs
fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name: &str| vars.get(name).cloned()
}

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.transmission.host, "localhost");
    assert_eq!(config.transmission.port, 9091);
    assert!(config.transmission.username.is_empty());
    assert!(config.transmission.password.is_empty());
    assert_eq!(config.nat.gateway, "10.2.0.1");
    assert_eq!(config.nat.port_lifetime, 120);
    assert_eq!(config.log_level, LogLevel::Info);
}

#[test]
fn test_from_yaml_full() {
    let yaml = r#"
log_level: DEBUG
transmission:
  host: seedbox.lan
  port: 9092
  username: user
  password: secret
nat:
  gateway: 192.168.1.1
  port_lifetime: 300
"#;

    let config = assert_ok!(Config::from_yaml(yaml));

    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.transmission.host, "seedbox.lan");
    assert_eq!(config.transmission.port, 9092);
    assert_eq!(config.transmission.username, "user");
    assert_eq!(config.transmission.password, "secret");
    assert_eq!(config.nat.gateway, "192.168.1.1");
    assert_eq!(config.nat.port_lifetime, 300);
}

#[test]
fn test_from_yaml_partial_keeps_defaults() {
    let yaml = r#"
transmission:
  username: user
"#;

    let config = assert_ok!(Config::from_yaml(yaml));

    assert_eq!(config.transmission.username, "user");
    assert_eq!(config.transmission.host, "localhost", "Missing host should keep default");
    assert_eq!(config.transmission.port, 9091, "Missing port should keep default");
    assert_eq!(config.nat, NatConfig::default(), "Missing section should keep defaults");
    assert_eq!(config.log_level, LogLevel::Info);
}

#[test]
fn test_from_yaml_empty_is_default() {
    let config = assert_ok!(Config::from_yaml("   \n"));
    assert_eq!(config, Config::default());
}

#[test]
fn test_from_yaml_unknown_log_level_falls_back_to_info() {
    let config = assert_ok!(Config::from_yaml("log_level: VERBOSE\n"));
    assert_eq!(config.log_level, LogLevel::Info);

    let rejected = config.rejected();
    assert_eq!(rejected.len(), 1, "Unknown level should be reported: {:?}", rejected);
    assert_eq!(rejected[0].name, "log_level");
    assert!(rejected[0].reason.contains("VERBOSE"));
}

#[test]
fn test_from_yaml_zero_lifetime_falls_back_to_default() {
    let config = assert_ok!(Config::from_yaml("nat:\n  port_lifetime: 0\n"));

    assert_eq!(config.nat.port_lifetime, DEFAULT_PORT_LIFETIME, "Zero would delete the mapping");
    assert_eq!(config.rejected().len(), 1);
    assert_eq!(config.rejected()[0].name, "nat.port_lifetime");
}

#[test]
fn test_from_yaml_valid_values_reject_nothing() {
    let config = assert_ok!(Config::from_yaml("log_level: warn\nnat:\n  port_lifetime: 1\n"));

    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.nat.port_lifetime, 1);
    assert!(config.rejected().is_empty());
}

#[test]
fn test_from_yaml_invalid() {
    let err = assert_err!(Config::from_yaml("nat: 42\n"));
    assert!(matches!(err, Error::Yaml(_)), "Expected YAML error, got: {:?}", err);
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    writeln!(file, "nat:\n  port_lifetime: 60").expect("Failed to write config");

    let config = assert_ok!(Config::from_file(file.path()));
    assert_eq!(config.nat.port_lifetime, 60);
}

#[test]
fn test_load_missing_file_is_error() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("missing.yaml");

    let err = assert_err!(Config::load(Some(path.as_path()), false));
    assert!(matches!(err, Error::Config(_)), "Expected config error, got: {:?}", err);
}

#[test]
fn test_load_without_file_or_env_is_default() {
    let config = assert_ok!(Config::load(None, false));
    assert_eq!(config, Config::default());
}

#[test]
fn test_env_overrides_every_field() {
    let mut config = Config::default();
    config.apply_env_with(env(&[
        ("PROTRANS_LOG_LEVEL", "TRACE"),
        ("PROTRANS_TRANSMISSION_HOST", "10.0.0.5"),
        ("PROTRANS_TRANSMISSION_PORT", "9999"),
        ("PROTRANS_TRANSMISSION_USERNAME", "admin"),
        ("PROTRANS_TRANSMISSION_PASSWORD", "hunter2"),
        ("PROTRANS_NAT_GATEWAY", "10.8.0.1"),
        ("PROTRANS_NAT_PORT_LIFETIME", "60"),
    ]));

    assert_eq!(config.log_level, LogLevel::Trace);
    assert_eq!(config.transmission.host, "10.0.0.5");
    assert_eq!(config.transmission.port, 9999);
    assert_eq!(config.transmission.username, "admin");
    assert_eq!(config.transmission.password, "hunter2");
    assert_eq!(config.nat.gateway, "10.8.0.1");
    assert_eq!(config.nat.port_lifetime, 60);
}

#[test]
fn test_env_overrides_file_field_by_field() {
    let mut config = assert_ok!(Config::from_yaml(
        "transmission:\n  host: from-file\n  port: 1234\n"
    ));
    config.apply_env_with(env(&[("PROTRANS_TRANSMISSION_PORT", "4321")]));

    assert_eq!(config.transmission.host, "from-file", "Unset variables keep file values");
    assert_eq!(config.transmission.port, 4321);
}

#[test]
fn test_env_invalid_number_is_ignored() {
    let mut config = Config::default();
    config.apply_env_with(env(&[
        ("PROTRANS_TRANSMISSION_PORT", "not-a-port"),
        ("PROTRANS_NAT_PORT_LIFETIME", "70000"),
    ]));

    assert_eq!(config.transmission.port, 9091);
    assert_eq!(config.nat.port_lifetime, 120);

    let names: Vec<&str> = config.rejected().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        ["PROTRANS_TRANSMISSION_PORT", "PROTRANS_NAT_PORT_LIFETIME"],
        "Every ignored variable should be reported"
    );
}

#[test]
fn test_env_zero_lifetime_is_ignored() {
    let mut config = assert_ok!(Config::from_yaml("nat:\n  port_lifetime: 300\n"));
    config.apply_env_with(env(&[("PROTRANS_NAT_PORT_LIFETIME", "0")]));

    assert_eq!(config.nat.port_lifetime, 300, "Zero should keep the file value");
    assert_eq!(config.rejected().len(), 1);
    assert_eq!(config.rejected()[0].name, "PROTRANS_NAT_PORT_LIFETIME");
    assert!(config.rejected()[0].reason.contains("keeping previous value"));
}

#[test]
fn test_env_unknown_log_level_is_ignored() {
    let mut config = assert_ok!(Config::from_yaml("log_level: DEBUG\n"));
    config.apply_env_with(env(&[("PROTRANS_LOG_LEVEL", "LOUD")]));

    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.rejected()[0].name, "PROTRANS_LOG_LEVEL");
}

#[test]
fn test_rejected_value_display() {
    let rejected = RejectedValue {
        name: "PROTRANS_TRANSMISSION_PORT".to_string(),
        reason: "bad".to_string(),
    };
    assert_eq!(rejected.to_string(), "PROTRANS_TRANSMISSION_PORT: bad");
}

#[test]
fn test_gateway_ip() {
    let mut config = Config::default();
    assert_eq!(config.gateway_ip(), Ipv4Addr::new(10, 2, 0, 1));

    config.nat.gateway = "192.168.0.254".to_string();
    assert_eq!(config.gateway_ip(), Ipv4Addr::new(192, 168, 0, 254));
}

#[test]
fn test_gateway_ip_invalid_falls_back() {
    let mut config = Config::default();

    for invalid in ["router.lan", "300.1.1.1", "10.2.0", ""] {
        config.nat.gateway = invalid.to_string();
        assert_eq!(
            config.gateway_ip(),
            DEFAULT_GATEWAY,
            "Invalid gateway {:?} should fall back to default",
            invalid
        );
    }
}

#[test]
fn test_log_level_parsing() {
    assert_eq!("TRACE".parse::<LogLevel>().unwrap(), LogLevel::Trace);
    assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
    assert_eq!(" Warn ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    assert_eq!("PANIC".parse::<LogLevel>().unwrap(), LogLevel::Panic);
    assert!("LOUD".parse::<LogLevel>().is_err());
}

#[test]
fn test_log_level_filter() {
    assert_eq!(LogLevel::Trace.level_filter(), LevelFilter::TRACE);
    assert_eq!(LogLevel::Info.level_filter(), LevelFilter::INFO);
    assert_eq!(LogLevel::Warn.level_filter(), LevelFilter::WARN);
    assert_eq!(LogLevel::Error.level_filter(), LevelFilter::ERROR);
    assert_eq!(LogLevel::Fatal.level_filter(), LevelFilter::ERROR);
    assert_eq!(LogLevel::Panic.level_filter(), LevelFilter::ERROR);
}

#[test]
fn test_display_hides_password() {
    let mut config = Config::default();
    config.transmission.password = "hunter2".to_string();

    let shown = config.to_string();
    assert!(!shown.contains("hunter2"), "Password must not be displayed: {}", shown);
    assert!(shown.contains("Password=\"set\""));

    config.transmission.password.clear();
    assert!(config.to_string().contains("Password=\"not set\""));
}
