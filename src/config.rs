//! ==============================================================================
//! config.rs - node configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `node.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - NodeSection: role (sender or gateway) and this sender's id.
//!     - RadioConfig: own hardware address, udp bind, peer table.
//!     - SamplingConfig: adc channels, averaging, calibration.
//!     - SenderConfig / ActuatorConfig: where readings go, which pin the relay is on.
//!     - GatewayConfig: batch/reap/poll periods, staleness timeout, station table.
//!     - BackendConfig: base url, endpoint paths, http timeout.
//!     - LoggingConfig: level and per-reading output.
//!
//! every section has defaults, so a file only needs what differs.
//!
//! ==============================================================================

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::domain::SenderId;
use crate::error::ConfigError;
use crate::radio::MacAddr;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub radio: RadioConfig,
    pub sampling: SamplingConfig,
    pub sender: SenderConfig,
    pub actuator: ActuatorConfig,
    pub gateway: GatewayConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Gateway,
}

impl std::str::FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(Role::Sender),
            "gateway" => Ok(Role::Gateway),
            other => Err(ConfigError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeSection {
    pub role: Role,
    /// required for senders, ignored by the gateway
    pub sender_id: Option<SenderId>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            role: Role::Gateway,
            sender_id: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PeerConfig {
    pub mac: MacAddr,
    pub socket: SocketAddr,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RadioConfig {
    pub mac: MacAddr,
    pub bind: String,
    pub peers: Vec<PeerConfig>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            mac: MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x01]),
            bind: "0.0.0.0:4210".to_string(),
            peers: Vec::new(),
        }
    }
}

impl RadioConfig {
    pub fn peer_table(&self) -> HashMap<MacAddr, SocketAddr> {
        self.peers.iter().map(|p| (p.mac, p.socket)).collect()
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct VoltageCalibration {
    /// volts at the panel per volt at the adc pin (divider ratio)
    pub scale: f32,
    pub offset: f32,
}

impl Default for VoltageCalibration {
    fn default() -> Self {
        // 30k / 7.5k divider
        Self {
            scale: 5.0,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CurrentCalibration {
    /// sensor output at zero current
    pub zero_volts: f32,
    pub volts_per_amp: f32,
    /// magnitudes below this are reported as exactly zero
    pub noise_gate_amps: f32,
}

impl Default for CurrentCalibration {
    fn default() -> Self {
        Self {
            zero_volts: 2.5,
            volts_per_amp: 0.1,
            noise_gate_amps: 0.05,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ThermistorCalibration {
    pub series_ohms: f32,
    pub nominal_ohms: f32,
    pub nominal_celsius: f32,
    pub beta: f32,
}

impl Default for ThermistorCalibration {
    fn default() -> Self {
        // 10k NTC, B = 3950, 10k series resistor
        Self {
            series_ohms: 10_000.0,
            nominal_ohms: 10_000.0,
            nominal_celsius: 25.0,
            beta: 3950.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_ms: u64,
    pub samples_per_channel: u32,
    /// upper bound on one sampling pass, dht read included
    pub window_ms: u64,
    pub adc_max: u16,
    pub adc_ref_volts: f32,
    pub light_channel: u8,
    pub voltage_channel: u8,
    pub current_channel: u8,
    pub thermistor_channel: u8,
    pub dht_pin: u8,
    pub voltage: VoltageCalibration,
    pub current: CurrentCalibration,
    pub thermistor: ThermistorCalibration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            samples_per_channel: 20,
            window_ms: 2_000,
            adc_max: 4095,
            adc_ref_volts: 3.3,
            light_channel: 0,
            voltage_channel: 1,
            current_channel: 2,
            thermistor_channel: 3,
            dht_pin: 4,
            voltage: VoltageCalibration::default(),
            current: CurrentCalibration::default(),
            thermistor: ThermistorCalibration::default(),
        }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SenderConfig {
    pub gateway_mac: MacAddr,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            gateway_mac: RadioConfig::default().mac,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActuatorConfig {
    pub relay_pin: u8,
    /// relay boards that switch on a LOW input
    pub active_low: bool,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            relay_pin: 26,
            active_low: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StationConfig {
    pub id: SenderId,
    pub mac: MacAddr,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub batch_interval_ms: u64,
    pub reap_interval_ms: u64,
    pub stale_timeout_ms: u64,
    pub command_poll_interval_ms: u64,
    pub poll_stagger_ms: u64,
    /// closed set of stations the command relay polls for
    pub stations: Vec<StationConfig>,
    /// local read-only status api, off when unset
    pub status_bind: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: 2_000,
            reap_interval_ms: 2_000,
            stale_timeout_ms: 25_000,
            command_poll_interval_ms: 5_000,
            poll_stagger_ms: 100,
            stations: Vec::new(),
            status_bind: None,
        }
    }
}

impl GatewayConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_millis(self.command_poll_interval_ms)
    }

    pub fn poll_stagger(&self) -> Duration {
        Duration::from_millis(self.poll_stagger_ms)
    }

    /// station ids in configured order
    pub fn station_ids(&self) -> Vec<SenderId> {
        self.stations.iter().map(|s| s.id).collect()
    }

    pub fn station_table(&self) -> HashMap<SenderId, MacAddr> {
        self.stations.iter().map(|s| (s.id, s.mac)).collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub batch_path: String,
    pub command_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_ms: 3_000,
            batch_path: "/api/gateway-data".to_string(),
            command_path: "/api/get-command".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before logging is up, hence the plain prints.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let paths = [
            PathBuf::from("config").join("node.toml"),
            PathBuf::from("..").join("config").join("node.toml"),
        ];

        for path in &paths {
            if path.exists() {
                let config = Self::load(path)?;
                println!("[CONFIG] Loaded from {}", path.display());
                return Ok(config);
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.role == Role::Sender {
            match self.node.sender_id {
                None => return Err(ConfigError::MissingSenderId),
                Some(id) if id <= 0 => return Err(ConfigError::InvalidSenderId(id)),
                Some(_) => {}
            }
        }

        let mut seen = HashSet::new();
        for station in &self.gateway.stations {
            if station.id <= 0 {
                return Err(ConfigError::InvalidSenderId(station.id));
            }
            if !seen.insert(station.id) {
                return Err(ConfigError::DuplicateStation(station.id));
            }
        }

        let nonzero = [
            ("sampling.interval_ms", self.sampling.interval_ms),
            ("sampling.samples_per_channel", self.sampling.samples_per_channel as u64),
            ("sampling.window_ms", self.sampling.window_ms),
            ("sampling.adc_max", self.sampling.adc_max as u64),
            ("gateway.batch_interval_ms", self.gateway.batch_interval_ms),
            ("gateway.reap_interval_ms", self.gateway.reap_interval_ms),
            ("gateway.stale_timeout_ms", self.gateway.stale_timeout_ms),
            ("gateway.command_poll_interval_ms", self.gateway.command_poll_interval_ms),
            ("backend.timeout_ms", self.backend.timeout_ms),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        // divisors: must be finite and non-zero
        let s = &self.sampling;
        let divisors = [
            ("sampling.adc_ref_volts", s.adc_ref_volts),
            ("sampling.current.volts_per_amp", s.current.volts_per_amp),
            ("sampling.thermistor.series_ohms", s.thermistor.series_ohms),
            ("sampling.thermistor.nominal_ohms", s.thermistor.nominal_ohms),
            ("sampling.thermistor.beta", s.thermistor.beta),
        ];
        for (name, value) in divisors {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite(name));
            }
            if value == 0.0 {
                return Err(ConfigError::Zero(name));
            }
        }

        let finite = [
            ("sampling.voltage.scale", s.voltage.scale),
            ("sampling.voltage.offset", s.voltage.offset),
            ("sampling.current.zero_volts", s.current.zero_volts),
            ("sampling.current.noise_gate_amps", s.current.noise_gate_amps),
            ("sampling.thermistor.nominal_celsius", s.thermistor.nominal_celsius),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite(name));
            }
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            role = ?self.node.role,
            mac = %self.radio.mac,
            bind = %self.radio.bind,
            "node configuration"
        );
        match self.node.role {
            Role::Sender => tracing::info!(
                sender_id = ?self.node.sender_id,
                gateway = %self.sender.gateway_mac,
                interval_ms = self.sampling.interval_ms,
                samples = self.sampling.samples_per_channel,
                "sender settings"
            ),
            Role::Gateway => tracing::info!(
                batch_ms = self.gateway.batch_interval_ms,
                stale_ms = self.gateway.stale_timeout_ms,
                poll_ms = self.gateway.command_poll_interval_ms,
                stations = ?self.gateway.station_ids(),
                backend = %self.backend.base_url,
                "gateway settings"
            ),
        }
    }
}
