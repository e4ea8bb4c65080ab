//! Integration tests for configuration loading

use isbn_fusion::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[device]
id = "kiosk-3"

[scanner]
ocr_every_n_frames = 6
max_in_flight = 2
max_consecutive_release_failures = 4
event_channel_capacity = 16

[metrics]
interval_secs = 15
prometheus_port = 9091

[logging]
json = true
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.device_id(), "kiosk-3");
    assert_eq!(config.ocr_every_n_frames(), 6);
    assert_eq!(config.max_in_flight(), 2);
    assert_eq!(config.max_consecutive_release_failures(), 4);
    assert_eq!(config.event_channel_capacity(), 16);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.prometheus_port(), 9091);
    assert!(config.log_json());
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_partial_config_uses_defaults() {
    let temp_file = write_config(
        r#"
[scanner]
ocr_every_n_frames = 24
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.ocr_every_n_frames(), 24);
    assert_eq!(config.max_in_flight(), 1);
    assert_eq!(config.device_id(), "scanner");
    assert_eq!(config.prometheus_port(), 0);
}

#[test]
fn test_zero_throttle_rejected() {
    let temp_file = write_config(
        r#"
[scanner]
ocr_every_n_frames = 0
"#,
    );

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("ocr_every_n_frames"));
}

#[test]
fn test_zero_in_flight_rejected() {
    let temp_file = write_config(
        r#"
[scanner]
max_in_flight = 0
"#,
    );

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_invalid_toml_rejected() {
    let temp_file = write_config("[scanner\nocr_every_n_frames = ");
    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.ocr_every_n_frames(), 12);
    assert_eq!(config.max_in_flight(), 1);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_dev_config_parses() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(config.device_id(), "dev-scanner");
    assert_eq!(config.ocr_every_n_frames(), 12);
}
