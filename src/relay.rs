//! ==============================================================================
//! relay.rs - gateway command relay
//! ==============================================================================
//!
//! purpose:
//!     every command-poll period, ask the backend once per configured station
//!     whether a command is waiting, and forward it over the radio to that
//!     station's hardware address.
//!
//! one command goes POLLED -> PARSED -> ADDRESSED -> SENT:
//!
//!     POLLED     GET answered; 204 ends here (no command)
//!     PARSED     body decoded, command fits the 32-byte payload
//!     ADDRESSED  station id found in the static address table
//!     SENT       handed to the radio
//!
//! a failure at any stage drops that one command, logs it, and the cycle
//! moves on to the next station after a short stagger.
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backend::{Backend, CommandPoll};
use crate::domain::{Command, CommandMessage, SenderId};
use crate::error::BackendError;
use crate::radio::{MacAddr, Radio};
use crate::wire;

/// How far one station's poll got
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// backend answered 204
    NoCommand,
    /// handed to the radio
    Sent { message: CommandMessage, to: MacAddr },
    /// transport error, timeout or unexpected status
    PollFailed,
    /// body did not decode, or the command does not fit the payload
    Malformed,
    /// no hardware address configured for the target station
    UnknownStation(SenderId),
    /// radio refused the frame
    SendFailed,
}

pub struct CommandRelay<R, B> {
    radio: Arc<R>,
    backend: Arc<B>,
    stations: Vec<SenderId>,
    addresses: HashMap<SenderId, MacAddr>,
    stagger: Duration,
}

impl<R: Radio, B: Backend> CommandRelay<R, B> {
    pub fn new(
        radio: Arc<R>,
        backend: Arc<B>,
        stations: Vec<SenderId>,
        addresses: HashMap<SenderId, MacAddr>,
        stagger: Duration,
    ) -> Self {
        Self {
            radio,
            backend,
            stations,
            addresses,
            stagger,
        }
    }

    /// Poll every station once, in configured order.
    pub async fn run_cycle(&self) -> Vec<(SenderId, RelayOutcome)> {
        let mut outcomes = Vec::with_capacity(self.stations.len());
        for (i, &station) in self.stations.iter().enumerate() {
            if i > 0 && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }
            outcomes.push((station, self.relay_station(station).await));
        }
        outcomes
    }

    pub async fn relay_station(&self, station: SenderId) -> RelayOutcome {
        // POLLED
        let pending = match self.backend.poll_command(station).await {
            Ok(CommandPoll::Empty) => return RelayOutcome::NoCommand,
            Ok(CommandPoll::Pending(pending)) => pending,
            Err(BackendError::Decode(e)) => {
                tracing::warn!(station, "command body malformed: {e}");
                return RelayOutcome::Malformed;
            }
            Err(e) => {
                tracing::warn!(station, "command poll failed: {e}");
                return RelayOutcome::PollFailed;
            }
        };

        // PARSED
        if pending.station_id != station {
            tracing::warn!(
                station,
                target = pending.station_id,
                "command poll answered for another station, forwarding to the named target"
            );
        }
        let payload = match wire::encode_command(&pending.command) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(station, command = %pending.command, "command rejected: {e}");
                return RelayOutcome::Malformed;
            }
        };
        let message = CommandMessage {
            target_sender_id: pending.station_id,
            command: Command::parse(&pending.command),
        };
        let (target, command) = (message.target_sender_id, &message.command);

        // ADDRESSED
        let Some(&mac) = self.addresses.get(&target) else {
            tracing::warn!(
                station = target,
                %command,
                "no hardware address for station, command dropped"
            );
            return RelayOutcome::UnknownStation(target);
        };

        // SENT
        match self.radio.send(mac, &payload).await {
            Ok(()) => {
                tracing::info!(station = target, %mac, %command, "command relayed");
                RelayOutcome::Sent { message, to: mac }
            }
            Err(e) => {
                tracing::warn!(station = target, %mac, %command, "command send failed: {e}");
                RelayOutcome::SendFailed
            }
        }
    }

    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PendingCommand, UplinkRecord};
    use crate::radio::{MemoryAir, MemoryRadio};
    use std::sync::Mutex;

    const GATEWAY: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x01]);
    const STATION_1: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x0A]);
    const STATION_2: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x0B]);

    /// canned answers per station; unlisted stations get 204
    #[derive(Default)]
    struct ScriptedBackend {
        answers: Mutex<HashMap<SenderId, Result<CommandPoll, u16>>>,
        polled: Mutex<Vec<SenderId>>,
    }

    impl ScriptedBackend {
        fn answer(self, station: SenderId, answer: Result<CommandPoll, u16>) -> Self {
            self.answers.lock().unwrap().insert(station, answer);
            self
        }
    }

    impl Backend for ScriptedBackend {
        async fn post_batch(&self, _batch: &[UplinkRecord]) -> Result<(), BackendError> {
            Ok(())
        }

        async fn poll_command(&self, station_id: SenderId) -> Result<CommandPoll, BackendError> {
            self.polled.lock().unwrap().push(station_id);
            match self.answers.lock().unwrap().remove(&station_id) {
                Some(Ok(poll)) => Ok(poll),
                Some(Err(500)) => Err(BackendError::Status(500)),
                Some(Err(_)) => Err(BackendError::Decode(
                    serde_json::from_str::<PendingCommand>("{").unwrap_err(),
                )),
                None => Ok(CommandPoll::Empty),
            }
        }
    }

    fn pending(station_id: SenderId, command: &str) -> Result<CommandPoll, u16> {
        Ok(CommandPoll::Pending(PendingCommand {
            station_id,
            command: command.to_string(),
        }))
    }

    type TestRelay = CommandRelay<MemoryRadio, ScriptedBackend>;

    fn relay(backend: ScriptedBackend) -> (MemoryAir, MemoryRadio, TestRelay) {
        let air = MemoryAir::new();
        let gateway = Arc::new(air.attach(GATEWAY));
        let station_1 = air.attach(STATION_1);
        let addresses = HashMap::from([(1, STATION_1), (2, STATION_2)]);
        let relay = CommandRelay::new(
            gateway,
            Arc::new(backend),
            vec![1, 2],
            addresses,
            Duration::ZERO,
        );
        (air, station_1, relay)
    }

    #[tokio::test]
    async fn test_no_content_sends_nothing() {
        let (air, _s1, relay) = relay(ScriptedBackend::default());
        assert_eq!(relay.relay_station(2).await, RelayOutcome::NoCommand);
        assert!(air.frames().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_relayed_to_station_address() {
        let backend = ScriptedBackend::default().answer(1, pending(1, "TOGGLE_RELAY"));
        let (air, station_1, relay) = relay(backend);

        let outcomes = relay.run_cycle().await;
        assert_eq!(
            outcomes,
            vec![
                (
                    1,
                    RelayOutcome::Sent {
                        message: CommandMessage {
                            target_sender_id: 1,
                            command: Command::ToggleRelay
                        },
                        to: STATION_1
                    }
                ),
                (2, RelayOutcome::NoCommand),
            ]
        );

        let frames = air.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].to, STATION_1);
        assert_eq!(wire::decode_command(&frames[0].payload).unwrap(), "TOGGLE_RELAY");

        let (from, payload) = station_1.recv().await.unwrap();
        assert_eq!(from, GATEWAY);
        assert_eq!(payload.len(), wire::COMMAND_PAYLOAD_LEN);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_cycle() {
        let backend = ScriptedBackend::default()
            .answer(1, Err(500))
            .answer(2, pending(2, "ACTIVATE_RELAY"));
        let (air, _s1, relay) = relay(backend);

        let outcomes = relay.run_cycle().await;
        assert_eq!(outcomes[0], (1, RelayOutcome::PollFailed));
        assert!(matches!(outcomes[1].1, RelayOutcome::Sent { to, .. } if to == STATION_2));
        assert_eq!(air.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (air, _s1, relay) = relay(ScriptedBackend::default().answer(1, Err(0)));
        assert_eq!(relay.relay_station(1).await, RelayOutcome::Malformed);
        assert!(air.frames().is_empty());
    }

    #[tokio::test]
    async fn test_oversize_command_is_malformed() {
        let long = "X".repeat(40);
        let (air, _s1, relay) = relay(ScriptedBackend::default().answer(1, pending(1, &long)));
        assert_eq!(relay.relay_station(1).await, RelayOutcome::Malformed);
        assert!(air.frames().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_target_station() {
        let backend = ScriptedBackend::default().answer(1, pending(9, "TOGGLE_RELAY"));
        let (air, _s1, relay) = relay(backend);
        assert_eq!(relay.relay_station(1).await, RelayOutcome::UnknownStation(9));
        assert!(air.frames().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_still_forwarded() {
        let (air, _s1, relay) = relay(ScriptedBackend::default().answer(1, pending(1, "REBOOT")));
        assert_eq!(
            relay.relay_station(1).await,
            RelayOutcome::Sent {
                message: CommandMessage {
                    target_sender_id: 1,
                    command: Command::Unknown("REBOOT".into())
                },
                to: STATION_1
            }
        );
        assert_eq!(air.frames().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stations_polled_in_order_with_stagger() {
        let air = MemoryAir::new();
        let backend = Arc::new(ScriptedBackend::default());
        let relay = CommandRelay::new(
            Arc::new(air.attach(GATEWAY)),
            backend.clone(),
            vec![2, 1, 3],
            HashMap::new(),
            Duration::from_millis(100),
        );

        let start = Instant::now();
        relay.run_cycle().await;
        assert_eq!(*backend.polled.lock().unwrap(), vec![2, 1, 3]);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
