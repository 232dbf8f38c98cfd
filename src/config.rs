///
/// config.rs
///
/// Monitor and connection configuration.
///
/// Everything here is plain serde data so it can come from a JSON file and be
/// overridden from the command line.
///
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CanBusError, Result};

/// Timing and capacity settings for a [`crate::monitor::Monitor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Maximum rows kept in the frame log (0 = unlimited).
    pub log_capacity: usize,
    /// Period at which buffered rows are pushed into the log.
    pub flush_interval_ms: u64,
    /// Period of the bitrate sampler; also the inactivity timeout.
    pub activity_interval_ms: u64,
    /// Period of bus status polling while connected.
    pub bus_status_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_capacity: 1000,
            flush_interval_ms: 250,
            activity_interval_ms: 1000,
            bus_status_interval_ms: 2000,
        }
    }
}

impl MonitorConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the monitor cannot run with. Timer periods must be non-zero.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("flush_interval_ms", self.flush_interval_ms),
            ("activity_interval_ms", self.activity_interval_ms),
            ("bus_status_interval_ms", self.bus_status_interval_ms),
        ] {
            if value == 0 {
                return Err(CanBusError::Configuration(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn activity_interval(&self) -> Duration {
        Duration::from_millis(self.activity_interval_ms)
    }

    pub fn bus_status_interval(&self) -> Duration {
        Duration::from_millis(self.bus_status_interval_ms)
    }
}

/// Device parameters applied when connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Nominal bitrate in bit/s.
    pub bitrate: Option<u32>,
    /// Enable flexible data rate frames.
    pub can_fd: bool,
    /// Data phase bitrate in bit/s, FD only.
    pub data_bitrate: Option<u32>,
    /// Deliver transmitted frames to other sockets on this host.
    pub loopback: bool,
    /// Deliver transmitted frames back to this device as local echo.
    pub receive_own: bool,
}

/// What to connect to and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSettings {
    pub plugin: String,
    pub interface: String,
    /// Apply `configuration` to the device; when false the device defaults are kept.
    #[serde(default)]
    pub use_configuration: bool,
    #[serde(default)]
    pub configuration: BusConfig,
}

impl ConnectSettings {
    pub fn new(plugin: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            interface: interface.into(),
            use_configuration: false,
            configuration: BusConfig::default(),
        }
    }

    pub fn with_configuration(mut self, configuration: BusConfig) -> Self {
        self.use_configuration = true;
        self.configuration = configuration;
        self
    }

    /// Configuration in effect, or `None` if device defaults are used.
    pub fn effective_configuration(&self) -> Option<&BusConfig> {
        self.use_configuration.then_some(&self.configuration)
    }
}
