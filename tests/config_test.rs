//! Integration tests for configuration loading

use chrono::Duration;
use port_calls::domain::types::{PortCode, ZoneRole};
use port_calls::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[sessions]
default_gap_hours = 6.0
departure_closes_session = true

[ports.sts]
gap_hours = 18.0

[window]
lookback_days = 7

[workers]
count = 2

[egress]
dir = "/tmp/port-calls"

[metrics]
textfile = "/tmp/port_calls.prom"

[[zones]]
port_code = "STS"
zone_id = "ANCH_A"
role = "QUEUE"
priority = 1

[[zones]]
port_code = "STS"
zone_id = "BERTH_1"
role = "BERTH"
berth_slot = "1"
active = false
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.default_gap(), Duration::hours(6));
    assert_eq!(config.port_gaps().get(&PortCode::new("STS")), Some(&Duration::hours(18)));
    assert_eq!(config.port_gaps().get(&PortCode::new("SSZ")), None);
    assert!(config.departure_closes_session());
    assert_eq!(config.lookback_days(), 7);
    assert_eq!(config.since_days(), 365);
    assert_eq!(config.worker_count(), 2);
    assert_eq!(config.egress_dir(), "/tmp/port-calls");
    assert_eq!(config.metrics_textfile(), Some("/tmp/port_calls.prom"));
    assert_eq!(config.zones().len(), 2);
    assert_eq!(config.zones()[0].role, ZoneRole::Queue);
    assert!(!config.zones()[1].active);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Config::from_file("/nonexistent/config.toml").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/config.toml"));
}

#[test]
fn test_rejects_non_positive_port_gap() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[ports.STS]\ngap_hours = 0.0\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("gap_hours must be positive"));
}

#[test]
fn test_rejects_lookback_beyond_bound() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[window]\nlookback_days = 1000000\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("lookback_days must be at most"));
}

#[test]
fn test_dev_config_parses() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(config.site_id(), "dev");
    assert_eq!(config.port_gaps().get(&PortCode::new("SSZ")), Some(&Duration::hours(8)));
    assert_eq!(config.zones().len(), 5);
    assert_eq!(config.feature_windows_min(), &[30, 120, 360, 1440]);
}
