//! ==============================================================================
//! sender.rs - sender transport agent
//! ==============================================================================
//!
//! purpose:
//!     the two duties of a sensing node, running side by side:
//!
//!     transmit   every sampling interval: sample -> encode -> unicast to the
//!                gateway. a failed send is logged and forgotten; the next
//!                reading supersedes it.
//!     receive    wait for command payloads and drive the relay. unknown
//!                commands and undecodable payloads are logged and ignored.
//!
//! relationships:
//!     - uses: sampling.rs (readings), actuator.rs (relay), wire.rs, radio.rs
//!     - optional: classifier.rs (local fault label in the log)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::actuator::Relay;
use crate::classifier::FaultClassifier;
use crate::config::NodeConfig;
use crate::domain::{Command, ReadingRecord, SenderId};
use crate::error::{ConfigError, RadioError};
use crate::hal::SensorHardware;
use crate::radio::{MacAddr, Radio};
use crate::sampling::Sampler;
use crate::wire;

// ==============================================================================
// transmit path
// ==============================================================================

pub struct Transmitter<H, R> {
    sampler: Sampler<H>,
    radio: Arc<R>,
    gateway: MacAddr,
    classifier: Option<Arc<dyn FaultClassifier>>,
    show_data: bool,
}

impl<H: SensorHardware + 'static, R: Radio> Transmitter<H, R> {
    pub fn new(sampler: Sampler<H>, radio: Arc<R>, gateway: MacAddr) -> Self {
        Self {
            sampler,
            radio,
            gateway,
            classifier: None,
            show_data: false,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn show_data(mut self, show: bool) -> Self {
        self.show_data = show;
        self
    }

    /// One transmit cycle. The reading is returned even when the send failed.
    pub async fn transmit_once(&self) -> (ReadingRecord, Result<(), RadioError>) {
        let reading = self.sampler.sample().await;
        if self.show_data {
            tracing::info!(
                sender_id = reading.sender_id,
                "[SENSOR] V={:.2} I={:.2} T={:.1} H={:.1} Tth={:.1} LDR={}",
                reading.voltage,
                reading.current,
                reading.dht_temperature,
                reading.dht_humidity,
                reading.thermistor_temperature,
                reading.light_raw
            );
        }
        if let Some(classifier) = &self.classifier {
            match classifier.classify(&reading) {
                Some(class) if class.is_fault() => tracing::warn!(
                    sender_id = reading.sender_id,
                    %class,
                    "local classifier flags a fault"
                ),
                Some(class) => {
                    tracing::debug!(sender_id = reading.sender_id, %class, "local classification")
                }
                None => tracing::warn!(
                    sender_id = reading.sender_id,
                    "classifier returned an unknown class"
                ),
            }
        }

        let payload = wire::encode_reading(&reading);
        let sent = self.radio.send(self.gateway, &payload).await;
        match &sent {
            Ok(()) => tracing::debug!(gateway = %self.gateway, "reading delivered to radio"),
            Err(e) => tracing::warn!(gateway = %self.gateway, "reading send failed: {e}"),
        }
        (reading, sent)
    }

    /// Transmits immediately, then every `period`.
    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.transmit_once().await;
        }
    }
}

// ==============================================================================
// receive path
// ==============================================================================

pub struct CommandReceiver<H, R> {
    radio: Arc<R>,
    relay: Relay<H>,
}

impl<H: SensorHardware, R: Radio> CommandReceiver<H, R> {
    pub fn new(radio: Arc<R>, relay: Relay<H>) -> Self {
        Self { radio, relay }
    }

    pub fn relay(&self) -> &Relay<H> {
        &self.relay
    }

    /// Apply one inbound payload. Returns the new relay state when it acted.
    pub fn handle(&mut self, from: MacAddr, payload: &[u8]) -> Option<bool> {
        let name = match wire::decode_command(payload) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(%from, payload = %hex::encode(payload), "undecodable command: {e}");
                return None;
            }
        };
        let command = Command::parse(&name);
        match self.relay.apply(&command) {
            Some(on) => {
                tracing::info!(%from, %command, relay_on = on, "command applied");
                Some(on)
            }
            None => {
                tracing::warn!(%from, %command, "unknown command ignored");
                None
            }
        }
    }

    /// Runs until the radio closes.
    pub async fn run(mut self) -> Result<(), RadioError> {
        loop {
            match self.radio.recv().await {
                Ok((from, payload)) => {
                    self.handle(from, &payload);
                }
                Err(RadioError::Closed) => return Err(RadioError::Closed),
                Err(e) => tracing::warn!("radio receive failed: {e}"),
            }
        }
    }
}

// ==============================================================================
// node
// ==============================================================================

/// Both halves of a sender node, built from configuration.
pub struct SenderNode<H, R> {
    pub transmitter: Transmitter<H, R>,
    pub receiver: CommandReceiver<H, R>,
    interval: Duration,
}

impl<H: SensorHardware + 'static, R: Radio> SenderNode<H, R> {
    pub fn new(config: &NodeConfig, hardware: Arc<H>, radio: Arc<R>) -> Result<Self, ConfigError> {
        let sender_id: SenderId = config.node.sender_id.ok_or(ConfigError::MissingSenderId)?;
        let sampler = Sampler::new(sender_id, hardware.clone(), config.sampling.clone());
        let transmitter = Transmitter::new(sampler, radio.clone(), config.sender.gateway_mac)
            .show_data(config.logging.show_sensor_data);
        let receiver = CommandReceiver::new(radio, Relay::new(hardware, &config.actuator));
        Ok(Self {
            transmitter,
            receiver,
            interval: config.sampling.interval(),
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.transmitter = self.transmitter.with_classifier(classifier);
        self
    }

    /// Runs both loops; returns only if the radio goes away.
    pub async fn run(self) -> Result<(), RadioError> {
        let Self {
            transmitter,
            receiver,
            interval,
        } = self;
        tokio::select! {
            _ = transmitter.run(interval) => Ok(()),
            result = receiver.run() => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::FaultClass;
    use crate::config::Role;
    use crate::hal::MockHal;
    use crate::radio::MemoryAir;

    const GATEWAY: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x01]);
    const SENDER: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x0A]);

    fn sender_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.role = Role::Sender;
        config.node.sender_id = Some(1);
        config.sender.gateway_mac = GATEWAY;
        config.sampling.samples_per_channel = 4;
        config
    }

    fn relay_pin_level(hal: &MockHal, config: &NodeConfig) -> Option<bool> {
        hal.gpio_level(config.actuator.relay_pin)
    }

    #[test]
    fn test_missing_sender_id() {
        let mut config = sender_config();
        config.node.sender_id = None;
        let air = MemoryAir::new();
        let radio = Arc::new(air.attach(SENDER));
        let result = SenderNode::new(&config, Arc::new(MockHal::default()), radio);
        assert!(matches!(result, Err(ConfigError::MissingSenderId)));
    }

    #[tokio::test]
    async fn test_transmit_unicasts_reading_to_gateway() {
        let config = sender_config();
        let hal = Arc::new(MockHal::default());
        hal.set_dht(Some((25.5, 45.0)));
        let air = MemoryAir::new();
        let gateway = air.attach(GATEWAY);
        let node = SenderNode::new(&config, hal, Arc::new(air.attach(SENDER))).unwrap();

        let (reading, sent) = node.transmitter.transmit_once().await;
        assert!(sent.is_ok());
        assert_eq!(reading.sender_id, 1);
        assert!(reading.valid);

        let (from, payload) = gateway.recv().await.unwrap();
        assert_eq!(from, SENDER);
        assert_eq!(wire::decode_reading(&payload).unwrap(), reading);
        assert_eq!(air.frames()[0].to, GATEWAY);
    }

    #[tokio::test]
    async fn test_failed_send_still_returns_reading() {
        struct DeadRadio;
        impl Radio for DeadRadio {
            fn local_addr(&self) -> MacAddr {
                SENDER
            }
            async fn send(&self, to: MacAddr, _payload: &[u8]) -> Result<(), RadioError> {
                Err(RadioError::UnknownPeer(to))
            }
            async fn recv(&self) -> Result<(MacAddr, Vec<u8>), RadioError> {
                Err(RadioError::Closed)
            }
        }

        let config = sender_config();
        let node =
            SenderNode::new(&config, Arc::new(MockHal::default()), Arc::new(DeadRadio)).unwrap();
        let (reading, sent) = node.transmitter.transmit_once().await;
        assert!(matches!(sent, Err(RadioError::UnknownPeer(GATEWAY))));
        assert_eq!(reading.sender_id, 1);
    }

    #[test]
    fn test_commands_drive_relay() {
        let config = sender_config();
        let hal = Arc::new(MockHal::default());
        let air = MemoryAir::new();
        let mut node = SenderNode::new(&config, hal.clone(), Arc::new(air.attach(SENDER))).unwrap();
        let rx = &mut node.receiver;

        let toggle = wire::encode_command("TOGGLE_RELAY").unwrap();
        assert_eq!(rx.handle(GATEWAY, &toggle), Some(true));
        // active-low board: on drives the pin low
        assert_eq!(relay_pin_level(&hal, &config), Some(false));

        assert_eq!(rx.handle(GATEWAY, &toggle), Some(false));
        assert_eq!(
            rx.handle(GATEWAY, &wire::encode_command("ACTIVATE_RELAY").unwrap()),
            Some(true)
        );
        assert_eq!(
            rx.handle(GATEWAY, &wire::encode_command("DEACTIVATE_RELAY").unwrap()),
            Some(false)
        );
        assert!(!rx.relay().is_on());
    }

    #[test]
    fn test_unknown_and_garbage_commands_are_ignored() {
        let config = sender_config();
        let air = MemoryAir::new();
        let radio = Arc::new(air.attach(SENDER));
        let mut node = SenderNode::new(&config, Arc::new(MockHal::default()), radio).unwrap();
        let rx = &mut node.receiver;

        assert_eq!(rx.handle(GATEWAY, &wire::encode_command("REBOOT").unwrap()), None);
        assert_eq!(rx.handle(GATEWAY, b"short"), None);
        assert_eq!(rx.handle(GATEWAY, &[b'A'; 32]), None);
        assert!(!rx.relay().is_on());
    }

    #[tokio::test]
    async fn test_receive_loop_applies_radio_commands() {
        let config = sender_config();
        let hal = Arc::new(MockHal::default());
        let air = MemoryAir::new();
        let gateway = air.attach(GATEWAY);
        let node = SenderNode::new(&config, hal.clone(), Arc::new(air.attach(SENDER))).unwrap();
        let handle = tokio::spawn(node.receiver.run());

        gateway
            .send(SENDER, &wire::encode_command("ACTIVATE_RELAY").unwrap())
            .await
            .unwrap();
        for _ in 0..50 {
            if relay_pin_level(&hal, &config).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(relay_pin_level(&hal, &config), Some(false));
        handle.abort();
    }

    #[tokio::test]
    async fn test_classifier_does_not_change_reading() {
        struct AlwaysShort;
        impl FaultClassifier for AlwaysShort {
            fn predict(&self, _features: &[f32; 4]) -> usize {
                FaultClass::ShortCircuit as usize
            }
        }

        let config = sender_config();
        let air = MemoryAir::new();
        let _gateway = air.attach(GATEWAY);
        let radio = Arc::new(air.attach(SENDER));
        let node = SenderNode::new(&config, Arc::new(MockHal::default()), radio)
            .unwrap()
            .with_classifier(Arc::new(AlwaysShort));

        let (reading, sent) = node.transmitter.transmit_once().await;
        assert!(sent.is_ok());
        assert_eq!(wire::decode_reading(&air.frames()[0].payload).unwrap(), reading);
    }
}
