//! Configuration management for inkframe.
//!
//! Loads settings from /etc/inkframe/config.toml or uses defaults, then
//! layers command line overrides on top. The CLI always wins.

use std::fs;
use std::time::Duration;

use ink_common::{FrameError, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::net::DEFAULT_CHECK_URL;
use crate::transport::SocketTransport;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/inkframe/config.toml";

/// Display configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplaySection {
    /// EPD driver name, e.g. "mock"
    #[serde(default)]
    pub epd: Option<String>,
}

/// Image source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSection {
    /// URL the frame image is fetched from
    #[serde(default)]
    pub url: Option<String>,
}

/// Wake alarm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmSection {
    /// Minutes between wake alarms (and between refreshes when powered)
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

fn default_interval_minutes() -> u64 {
    20
}

impl Default for AlarmSection {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

/// Power module daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerSection {
    /// Disable to run without a power module (development machines)
    #[serde(default = "default_power_enabled")]
    pub enabled: bool,

    /// Daemon Unix socket path
    #[serde(default = "default_power_socket")]
    pub socket: String,

    /// Attempts per module operation
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Socket connect/read/write timeout in seconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

fn default_power_enabled() -> bool {
    true
}

fn default_power_socket() -> String {
    SocketTransport::DEFAULT_SOCKET.to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

fn default_io_timeout() -> u64 {
    5
}

impl Default for PowerSection {
    fn default() -> Self {
        Self {
            enabled: default_power_enabled(),
            socket: default_power_socket(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay(),
            io_timeout_secs: default_io_timeout(),
        }
    }
}

impl PowerSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.retry_delay_secs),
        )
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Connectivity probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySection {
    /// Endpoint that answers 204 with an empty body
    #[serde(default = "default_check_url")]
    pub check_url: String,

    /// Seconds between probes while offline
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_check_url() -> String {
    DEFAULT_CHECK_URL.to_string()
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for ConnectivitySection {
    fn default() -> Self {
        Self {
            check_url: default_check_url(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl ConnectivitySection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Host shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSection {
    /// Never shut the host down, even on battery
    #[serde(default)]
    pub suppress: bool,

    /// Minutes of grace before the scheduled shutdown
    #[serde(default = "default_shutdown_delay")]
    pub delay_minutes: u64,
}

fn default_shutdown_delay() -> u64 {
    1
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            suppress: false,
            delay_minutes: default_shutdown_delay(),
        }
    }
}

/// MQTT battery telemetry, enabled by the section's presence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSection {
    /// Broker host
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Battery state topic override
    #[serde(default)]
    pub topic: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

/// Full frame configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub display: DisplaySection,

    #[serde(default)]
    pub image: ImageSection,

    #[serde(default)]
    pub alarm: AlarmSection,

    #[serde(default)]
    pub power: PowerSection,

    #[serde(default)]
    pub connectivity: ConnectivitySection,

    #[serde(default)]
    pub shutdown: ShutdownSection,

    /// Optional battery telemetry
    #[serde(default)]
    pub mqtt: Option<MqttSection>,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load(path: &str) -> Self {
        Self::load_from_path(path).unwrap_or_else(|e| {
            warn!("config not loaded, using defaults: {}", e);
            Config::default()
        })
    }

    fn load_from_path(path: &str) -> Result<Self, FrameError> {
        let content = fs::read_to_string(path)
            .map_err(|e| FrameError::Validation(format!("read {}: {}", path, e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| FrameError::Validation(format!("parse {}: {}", path, e)))?;
        info!("loaded config from {}", path);
        Ok(config)
    }
}

/// Command line overrides layered on top of the config file
#[derive(Debug, Default)]
pub struct Overrides {
    pub epd: Option<String>,
    pub url: Option<String>,
    pub alarm_minutes: Option<u64>,
    pub no_shutdown: bool,
}

/// Effective settings after merging config and CLI
#[derive(Debug, Clone)]
pub struct Settings {
    pub epd: String,
    pub image_url: String,
    pub interval_minutes: u64,
    pub power: PowerSection,
    pub connectivity: ConnectivitySection,
    pub suppress_shutdown: bool,
    pub shutdown_delay_minutes: u64,
    pub mqtt: Option<MqttSection>,
}

/// Merge the config file with CLI overrides. The EPD driver and image URL
/// have no sensible defaults and must come from one of the two.
pub fn merge(config: Config, overrides: Overrides) -> Result<Settings, FrameError> {
    let epd = overrides.epd.or(config.display.epd).ok_or_else(|| {
        FrameError::Validation(
            "no EPD driver named; use --epd or the [display] config section".into(),
        )
    })?;
    let image_url = overrides.url.or(config.image.url).ok_or_else(|| {
        FrameError::Validation(
            "no image URL named; use --url or the [image] config section".into(),
        )
    })?;

    let interval_minutes = overrides
        .alarm_minutes
        .unwrap_or(config.alarm.interval_minutes);
    if interval_minutes == 0 {
        return Err(FrameError::Validation(
            "alarm interval must be at least one minute".into(),
        ));
    }

    Ok(Settings {
        epd,
        image_url,
        interval_minutes,
        power: config.power,
        connectivity: config.connectivity,
        suppress_shutdown: config.shutdown.suppress || overrides.no_shutdown,
        shutdown_delay_minutes: config.shutdown.delay_minutes,
        mqtt: config.mqtt,
    })
}
