use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};
use crate::bridge::UnknownVerbPolicy;
use crate::protocol::TelemetrySchema;

/// Serial (point-to-point stream) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub device: String,
    /// Line speed
    pub baud_rate: u32,
    /// Upper bound for a single blocking read
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub timeout: Duration,
    /// Schema used when this side writes telemetry lines
    pub telemetry_schema: TelemetrySchema,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            timeout: Duration::from_millis(10),
            telemetry_schema: TelemetrySchema::Extended,
        }
    }
}

/// Addressed bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// i2c-dev character device
    pub device: String,
    /// 7-bit target address shared by both participants
    pub address: u8,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            device: "/dev/i2c-1".to_string(),
            address: super::DEFAULT_BUS_ADDRESS,
        }
    }
}

/// Remote bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the line protocol listener binds to
    pub bind_addr: SocketAddr,
    /// Minimum spacing between two telemetry lines sent to the peer
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub telemetry_interval: Duration,
    /// Period of the driver loop calling `Relay::tick`
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub tick_interval: Duration,
    /// Longest accepted text line, on either side of the bridge
    pub max_line_length: usize,
    /// What to tell the peer about verbs the bridge does not know
    pub unknown_verb_policy: UnknownVerbPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], super::DEFAULT_PORT)),
            telemetry_interval: Duration::from_millis(10),
            tick_interval: Duration::from_millis(5),
            max_line_length: crate::protocol::MAX_LINE_LENGTH,
            unknown_verb_policy: UnknownVerbPolicy::Drop,
        }
    }
}

/// Configuration for a robot link node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub bus: BusConfig,
    pub bridge: BridgeConfig,
}

impl Config {
    /// Loads a JSON configuration file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the link cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(Error::config("serial.baud_rate must be non-zero"));
        }
        if self.serial.timeout.is_zero() {
            return Err(Error::config("serial.timeout must be non-zero"));
        }
        if !(0x03..=0x77).contains(&self.bus.address) {
            return Err(Error::config(format!(
                "bus.address {:#04x} is outside the 7-bit range",
                self.bus.address
            )));
        }
        if self.bridge.telemetry_interval.is_zero() || self.bridge.tick_interval.is_zero() {
            return Err(Error::config("bridge intervals must be non-zero"));
        }
        if self.bridge.max_line_length == 0 {
            return Err(Error::config("bridge.max_line_length must be non-zero"));
        }
        Ok(())
    }
}
