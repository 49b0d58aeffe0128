//! ==============================================================================
//! domain.rs - shared data model
//! ==============================================================================
//!
//! purpose:
//!     the records that flow between sender, gateway and backend.
//!
//! relationships:
//!     - ReadingRecord: produced by sampling.rs, carried by wire.rs, stored by store.rs
//!     - UplinkRecord: built by uplink.rs, posted by backend.rs
//!     - Command / PendingCommand: polled by relay.rs, dispatched by sender.rs
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// identity of a sender node, assigned by configuration
pub type SenderId = i32;

/// one snapshot produced by a sender per sampling cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReadingRecord {
    pub sender_id: SenderId,
    /// averaged light-dependent resistor ADC value (unscaled)
    pub light_raw: i32,
    /// 0.0 when the DHT read failed
    pub dht_temperature: f32,
    /// 0.0 when the DHT read failed
    pub dht_humidity: f32,
    /// 0.0 when the thermistor ADC value was out of range
    pub thermistor_temperature: f32,
    pub voltage: f32,
    pub current: f32,
    /// always true today; nothing downstream should rely on it meaning more
    pub valid: bool,
}

/// one element of the batch the gateway posts to the backend
///
/// field names are the backend's, including the mixed casing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkRecord {
    #[serde(rename = "senderId")]
    pub sender_id: SenderId,
    #[serde(rename = "ldrValue")]
    pub ldr_value: i32,
    #[serde(rename = "dhtTemp")]
    pub dht_temp: f32,
    pub humidity: f32,
    #[serde(rename = "thermistorTemp")]
    pub thermistor_temp: f32,
    pub voltage: f32,
    pub current: f32,
    pub valid: bool,
    pub gateway_timestamp_ms: u64,
}

impl UplinkRecord {
    pub fn from_reading(reading: &ReadingRecord, gateway_timestamp_ms: u64) -> Self {
        Self {
            sender_id: reading.sender_id,
            ldr_value: reading.light_raw,
            dht_temp: reading.dht_temperature,
            humidity: reading.dht_humidity,
            thermistor_temp: reading.thermistor_temperature,
            voltage: reading.voltage,
            current: reading.current,
            valid: reading.valid,
            gateway_timestamp_ms,
        }
    }
}

/// body of a 200 response from the backend's pending-command endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub station_id: SenderId,
    pub command: String,
}

/// actuator commands a sender understands
///
/// anything else arrives as `Unknown` and is logged and ignored by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ActivateRelay,
    DeactivateRelay,
    ToggleRelay,
    Unknown(String),
}

impl Command {
    pub fn parse(name: &str) -> Self {
        match name {
            "ACTIVATE_RELAY" => Command::ActivateRelay,
            "DEACTIVATE_RELAY" => Command::DeactivateRelay,
            "TOGGLE_RELAY" => Command::ToggleRelay,
            other => Command::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Command::ActivateRelay => "ACTIVATE_RELAY",
            Command::DeactivateRelay => "DEACTIVATE_RELAY",
            Command::ToggleRelay => "TOGGLE_RELAY",
            Command::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// a command addressed to one sender, in flight from gateway to sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    pub target_sender_id: SenderId,
    pub command: Command,
}
