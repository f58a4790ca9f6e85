//! Application configuration
//!
//! Loaded from the same JSON document the desktop application ships with. Only the
//! `devices` list and the optional `link` block matter here; presentation keys
//! (`title`, `size`, `urls`, `info`) are ignored.

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceError, DeviceRegistry, Result};

/// Baud rate the dongle firmware runs its CDC link at
pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 100;
pub const DEFAULT_IDLE_POLL_MS: u64 = 10;
pub const DEFAULT_MAX_READ_CHUNK: usize = 4096;

/// One registered hardware class as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    #[serde(rename = "VID")]
    pub vid: String,
    #[serde(rename = "PID")]
    pub pid: String,
}

/// Serial link timing and sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Upper bound a blocking read may stall the read loop
    pub read_timeout_ms: u64,
    /// Port re-enumeration period of the liveness loop
    pub liveness_interval_ms: u64,
    /// Sleep between polls while no inbound bytes are pending
    pub idle_poll_ms: u64,
    pub max_read_chunk: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            liveness_interval_ms: DEFAULT_LIVENESS_INTERVAL_MS,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            max_read_chunk: DEFAULT_MAX_READ_CHUNK,
        }
    }
}

impl LinkSettings {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub link: LinkSettings,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        log::info!("Loaded {} device signature(s) from {}", config.devices.len(), path.display());
        Ok(config)
    }

    /// Build the signature registry from the configured entries
    pub fn registry(&self) -> Result<DeviceRegistry> {
        if self.devices.is_empty() {
            return Err(DeviceError::InvalidConfiguration("no devices configured".to_string()));
        }
        DeviceRegistry::from_entries(&self.devices)
    }
}
