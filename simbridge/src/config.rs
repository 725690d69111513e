//! Configuration for the bridge.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Loop timing and bounds
    #[serde(default)]
    pub bridge: TimingConfig,

    /// OpenPLC controller connection (Modbus TCP)
    #[serde(default)]
    pub plc: PlcConfig,

    /// Simulation key-value store connection
    #[serde(default)]
    pub cache: CacheConfig,

    /// Address/tag translation tables
    #[serde(default)]
    pub mappings: MappingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Loop periods, staleness timeout, history bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Polling loop period in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Synchronization loop period in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: f64,

    /// How long before a connected endpoint counts as stale, in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: f64,

    /// Maximum history points retained per tag
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_poll_interval() -> f64 {
    2.0
}

fn default_sync_interval() -> f64 {
    1.0
}

fn default_connection_timeout() -> f64 {
    10.0
}

fn default_history_capacity() -> usize {
    100
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            sync_interval_secs: default_sync_interval(),
            connection_timeout_secs: default_connection_timeout(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sync_interval_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout_secs)
    }
}

/// A contiguous addressed block on the controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Block {
    /// First address of the block
    pub start: u16,
    /// Number of addresses in the block
    pub count: u16,
}

impl Block {
    /// Whether `addr` falls inside the block.
    ///
    /// Widened arithmetic: `start + count` may exceed the `u16` address
    /// space for blocks that validation rejects anyway.
    pub fn contains(&self, addr: u16) -> bool {
        u32::from(addr) >= u32::from(self.start)
            && u32::from(addr) < u32::from(self.start) + u32::from(self.count)
    }

    /// Whether the block fits inside the 16-bit Modbus address space.
    pub fn fits_address_space(&self) -> bool {
        u32::from(self.start) + u32::from(self.count) <= u32::from(u16::MAX) + 1
    }
}

/// Controller connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Host address (IP or hostname)
    #[serde(default = "default_plc_host")]
    pub host: String,

    /// Modbus TCP port
    #[serde(default = "default_plc_port")]
    pub port: u16,

    /// Modbus unit/slave ID
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect/read/write timeout in milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub timeout_ms: u64,

    /// Actuator coil block (%QX)
    #[serde(default = "default_coil_block")]
    pub coils: Block,

    /// Sensor input-register block (%IW)
    #[serde(default = "default_register_block")]
    pub input_registers: Block,
}

fn default_plc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_plc_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_io_timeout_ms() -> u64 {
    1000
}

fn default_coil_block() -> Block {
    Block { start: 0, count: 2 }
}

fn default_register_block() -> Block {
    Block { start: 0, count: 5 }
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: default_plc_host(),
            port: default_plc_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_io_timeout_ms(),
            coils: default_coil_block(),
            input_registers: default_register_block(),
        }
    }
}

impl PlcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Simulation key-value store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis connection URL
    #[serde(default = "default_cache_url")]
    pub url: String,

    /// Key prefix: tags are stored as `<namespace>_<tag>`
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_cache_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_namespace() -> String {
    "sim_state".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
            namespace: default_namespace(),
            timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Full store key for a tag.
    pub fn key_for(&self, tag: &str) -> String {
        format!("{}_{}", self.namespace, tag)
    }
}

/// One sensor tag written from the cache into a controller register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorMapping {
    pub tag: String,
    pub address: u16,
}

/// One controller coil published to the cache as an actuator tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorMapping {
    pub address: u16,
    pub tag: String,
}

/// The two static translation tables.
///
/// Each direction is injective on both columns; the directions need not be
/// inverses of each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Cache-to-controller direction: sensor tag -> input register address
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorMapping>,

    /// Controller-to-cache direction: coil address -> actuator tag
    #[serde(default = "default_actuators")]
    pub actuators: Vec<ActuatorMapping>,
}

fn default_sensors() -> Vec<SensorMapping> {
    [
        ("sim_SoilMoisture", 0),
        ("sim_Temperature", 1),
        ("sim_Humidity", 2),
        ("sim_WaterFlow", 3),
        ("sim_Pressure", 4),
    ]
    .into_iter()
    .map(|(tag, address)| SensorMapping {
        tag: tag.to_string(),
        address,
    })
    .collect()
}

fn default_actuators() -> Vec<ActuatorMapping> {
    [(0, "sim_PumpControl"), (1, "sim_ValveControl")]
        .into_iter()
        .map(|(address, tag)| ActuatorMapping {
            address,
            tag: tag.to_string(),
        })
        .collect()
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            sensors: default_sensors(),
            actuators: default_actuators(),
        }
    }
}

impl MappingConfig {
    /// Every tag named in either direction, deduplicated.
    pub fn all_tags(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut tags = Vec::new();
        for tag in self
            .sensors
            .iter()
            .map(|s| &s.tag)
            .chain(self.actuators.iter().map(|a| &a.tag))
        {
            if seen.insert(tag.clone()) {
                tags.push(tag.clone());
            }
        }
        tags
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge: TimingConfig::default(),
            plc: PlcConfig::default(),
            cache: CacheConfig::default(),
            mappings: MappingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate a JSON5 configuration file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check mapping injectivity and address-block consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.poll_interval_secs <= 0.0 || self.bridge.sync_interval_secs <= 0.0 {
            return Err(ConfigError::Validation(
                "loop intervals must be positive".to_string(),
            ));
        }
        if self.bridge.history_capacity == 0 {
            return Err(ConfigError::Validation(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if !self.plc.coils.fits_address_space() {
            return Err(ConfigError::Validation(format!(
                "coil block {}+{} exceeds the Modbus address space",
                self.plc.coils.start, self.plc.coils.count
            )));
        }
        if !self.plc.input_registers.fits_address_space() {
            return Err(ConfigError::Validation(format!(
                "input register block {}+{} exceeds the Modbus address space",
                self.plc.input_registers.start, self.plc.input_registers.count
            )));
        }

        let mut tags = HashSet::new();
        let mut addrs = HashSet::new();
        for sensor in &self.mappings.sensors {
            if !tags.insert(&sensor.tag) {
                return Err(ConfigError::Validation(format!(
                    "duplicate sensor tag '{}'",
                    sensor.tag
                )));
            }
            if !addrs.insert(sensor.address) {
                return Err(ConfigError::Validation(format!(
                    "duplicate sensor register address {}",
                    sensor.address
                )));
            }
            if !self.plc.input_registers.contains(sensor.address) {
                return Err(ConfigError::Validation(format!(
                    "sensor '{}' maps to register {} outside the configured block",
                    sensor.tag, sensor.address
                )));
            }
        }

        let mut tags = HashSet::new();
        let mut addrs = HashSet::new();
        for actuator in &self.mappings.actuators {
            if !tags.insert(&actuator.tag) {
                return Err(ConfigError::Validation(format!(
                    "duplicate actuator tag '{}'",
                    actuator.tag
                )));
            }
            if !addrs.insert(actuator.address) {
                return Err(ConfigError::Validation(format!(
                    "duplicate actuator coil address {}",
                    actuator.address
                )));
            }
            if !self.plc.coils.contains(actuator.address) {
                return Err(ConfigError::Validation(format!(
                    "actuator '{}' maps to coil {} outside the configured block",
                    actuator.tag, actuator.address
                )));
            }
        }

        Ok(())
    }
}
