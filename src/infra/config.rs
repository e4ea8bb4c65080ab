//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::{ensure, Context};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier used in logs and metrics labels
    #[serde(default = "default_device_id")]
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { id: default_device_id() }
    }
}

fn default_device_id() -> String {
    "scanner".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// OCR fallback runs on every Nth frame without a barcode hit
    #[serde(default = "default_ocr_every_n_frames")]
    pub ocr_every_n_frames: u64,
    /// Frames analyzed concurrently (1 = one image held at a time)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Consecutive frame release failures before the session is failed
    #[serde(default = "default_max_consecutive_release_failures")]
    pub max_consecutive_release_failures: u32,
    /// Capacity of the session event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            ocr_every_n_frames: default_ocr_every_n_frames(),
            max_in_flight: default_max_in_flight(),
            max_consecutive_release_failures: default_max_consecutive_release_failures(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_ocr_every_n_frames() -> u64 {
    12
}

fn default_max_in_flight() -> usize {
    1
}

fn default_max_consecutive_release_failures() -> u32 {
    8
}

fn default_event_channel_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), prometheus_port: 0 }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    device_id: String,
    ocr_every_n_frames: u64,
    max_in_flight: usize,
    max_consecutive_release_failures: u32,
    event_channel_capacity: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    log_json: bool,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            ocr_every_n_frames: default_ocr_every_n_frames(),
            max_in_flight: default_max_in_flight(),
            max_consecutive_release_failures: default_max_consecutive_release_failures(),
            event_channel_capacity: default_event_channel_capacity(),
            metrics_interval_secs: default_metrics_interval_secs(),
            prometheus_port: 0,
            log_json: false,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let scanner = &toml_config.scanner;
        ensure!(scanner.ocr_every_n_frames >= 1, "scanner.ocr_every_n_frames must be at least 1");
        ensure!(scanner.max_in_flight >= 1, "scanner.max_in_flight must be at least 1");
        ensure!(
            scanner.max_consecutive_release_failures >= 1,
            "scanner.max_consecutive_release_failures must be at least 1"
        );
        ensure!(
            scanner.event_channel_capacity >= 1,
            "scanner.event_channel_capacity must be at least 1"
        );
        ensure!(toml_config.metrics.interval_secs >= 1, "metrics.interval_secs must be at least 1");

        Ok(Self {
            device_id: toml_config.device.id,
            ocr_every_n_frames: toml_config.scanner.ocr_every_n_frames,
            max_in_flight: toml_config.scanner.max_in_flight,
            max_consecutive_release_failures: toml_config.scanner.max_consecutive_release_failures,
            event_channel_capacity: toml_config.scanner.event_channel_capacity,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            log_json: toml_config.logging.json,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn ocr_every_n_frames(&self) -> u64 {
        self.ocr_every_n_frames
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn max_consecutive_release_failures(&self) -> u32 {
        self.max_consecutive_release_failures
    }

    pub fn event_channel_capacity(&self) -> usize {
        self.event_channel_capacity
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override the OCR throttle period (clamped to at least 1)
    pub fn with_ocr_every_n_frames(mut self, n: u64) -> Self {
        self.ocr_every_n_frames = n.max(1);
        self
    }

    /// Builder method to override analysis concurrency (clamped to at least 1)
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }

    /// Builder method to override the release failure threshold (clamped to at least 1)
    pub fn with_max_consecutive_release_failures(mut self, n: u32) -> Self {
        self.max_consecutive_release_failures = n.max(1);
        self
    }
}
