//! relay actuator on a sender node
//!
//! hardware: relay module on `actuator.relay_pin`; most boards switch on a
//! LOW input (`active_low = true`), handled here so callers only see on/off.

use std::sync::Arc;

use crate::config::ActuatorConfig;
use crate::domain::Command;
use crate::hal::SensorHardware;

pub struct Relay<H> {
    hardware: Arc<H>,
    pin: u8,
    active_low: bool,
    on: bool,
}

impl<H: SensorHardware> Relay<H> {
    /// starts logically off; the pin is not touched until the first command
    pub fn new(hardware: Arc<H>, config: &ActuatorConfig) -> Self {
        Self {
            hardware,
            pin: config.relay_pin,
            active_low: config.active_low,
            on: false,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn activate(&mut self) -> bool {
        self.set(true)
    }

    pub fn deactivate(&mut self) -> bool {
        self.set(false)
    }

    pub fn toggle(&mut self) -> bool {
        self.set(!self.on)
    }

    /// Apply a command. `None` for commands this node does not know.
    pub fn apply(&mut self, command: &Command) -> Option<bool> {
        match command {
            Command::ActivateRelay => Some(self.activate()),
            Command::DeactivateRelay => Some(self.deactivate()),
            Command::ToggleRelay => Some(self.toggle()),
            Command::Unknown(_) => None,
        }
    }

    fn set(&mut self, on: bool) -> bool {
        self.on = on;
        let level = on != self.active_low;
        if let Err(e) = self.hardware.write_gpio(self.pin, level) {
            tracing::warn!(pin = self.pin, on, "relay gpio write failed: {e:#}");
        }
        self.on
    }
}
