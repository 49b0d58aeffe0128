//! ==============================================================================
//! gateway.rs - gateway node orchestration
//! ==============================================================================
//!
//! purpose:
//!     wires the gateway's loops around one shared aggregation store:
//!
//!     ┌──────────────┐ upsert ┌──────────────────┐ snapshot ┌─────────────┐
//!     │ radio recv   │───────►│ AggregationStore │─────────►│ uplink      │──► POST
//!     └──────────────┘        └──────────────────┘          └─────────────┘
//!                                 ▲        │ evict_stale
//!                       entries   │        ▼
//!                     ┌───────────┴┐   ┌─────────┐
//!                     │ status api │   │ reaper  │
//!                     └────────────┘   └─────────┘
//!
//!     ┌──────────────┐  GET per station   ┌──────────┐  unicast
//!     │ command relay│◄──────────────────►│ backend  │  ────────► sender
//!     └──────────────┘                    └──────────┘
//!
//! the store is the only state touched by more than one loop.
//!
//! ==============================================================================

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::Backend;
use crate::config::NodeConfig;
use crate::error::RadioError;
use crate::radio::{MacAddr, Radio};
use crate::reaper::Reaper;
use crate::relay::CommandRelay;
use crate::status;
use crate::store::{AggregationStore, Upsert};
use crate::uplink::UplinkBatcher;
use crate::wire;

/// Decode one inbound payload and fold it into the store.
///
/// Undecodable payloads and non-positive sender ids are logged and
/// dropped; `None` then.
pub fn ingest(
    store: &AggregationStore,
    from: MacAddr,
    payload: &[u8],
    now: Instant,
    show_data: bool,
) -> Option<Upsert> {
    let reading = match wire::decode_reading(payload) {
        Ok(reading) => reading,
        Err(e) => {
            tracing::warn!(%from, payload = %hex::encode(payload), "undecodable reading: {e}");
            return None;
        }
    };

    if reading.sender_id <= 0 {
        tracing::warn!(
            %from,
            sender_id = reading.sender_id,
            "reading with invalid sender id dropped"
        );
        return None;
    }

    let upsert = store.upsert(reading.sender_id, reading, now);
    if upsert == Upsert::Inserted {
        tracing::info!(sender_id = reading.sender_id, %from, "new sender");
    }
    if show_data {
        tracing::info!(
            sender_id = reading.sender_id,
            "[RECV] V={:.2} I={:.2} T={:.1} H={:.1} Tth={:.1} LDR={}",
            reading.voltage,
            reading.current,
            reading.dht_temperature,
            reading.dht_humidity,
            reading.thermistor_temperature,
            reading.light_raw
        );
    }
    Some(upsert)
}

/// Receive loop; returns only when the radio goes away.
pub async fn receive_loop<R: Radio>(
    radio: Arc<R>,
    store: AggregationStore,
    show_data: bool,
) -> RadioError {
    loop {
        match radio.recv().await {
            Ok((from, payload)) => {
                ingest(&store, from, &payload, Instant::now(), show_data);
            }
            Err(RadioError::Closed) => return RadioError::Closed,
            Err(e) => tracing::warn!("radio receive failed: {e}"),
        }
    }
}

pub struct Gateway<R, B> {
    config: NodeConfig,
    store: AggregationStore,
    radio: Arc<R>,
    backend: Arc<B>,
}

impl<R: Radio, B: Backend> Gateway<R, B> {
    pub fn new(config: NodeConfig, radio: Arc<R>, backend: Arc<B>) -> Self {
        Self {
            config,
            store: AggregationStore::new(),
            radio,
            backend,
        }
    }

    /// Handle to the shared store
    pub fn store(&self) -> AggregationStore {
        self.store.clone()
    }

    /// Start every loop on the current runtime.
    pub fn spawn(self) -> GatewayTasks {
        let gw = &self.config.gateway;
        let show_data = self.config.logging.show_sensor_data;

        let receive = tokio::spawn(receive_loop(self.radio.clone(), self.store.clone(), show_data));

        let mut loops = Vec::new();

        let uplink =
            UplinkBatcher::new(self.store.clone(), self.backend.clone(), gw.stale_timeout());
        loops.push(("uplink", tokio::spawn(uplink.run(gw.batch_interval()))));

        let reaper = Reaper::new(self.store.clone(), gw.stale_timeout());
        loops.push(("reaper", tokio::spawn(reaper.run(gw.reap_interval()))));

        if gw.stations.is_empty() {
            tracing::warn!("no stations configured, command relay disabled");
        } else {
            let relay = CommandRelay::new(
                self.radio.clone(),
                self.backend.clone(),
                gw.station_ids(),
                gw.station_table(),
                gw.poll_stagger(),
            );
            loops.push(("relay", tokio::spawn(relay.run(gw.command_poll_interval()))));
        }

        if let Some(bind) = gw.status_bind.clone() {
            let store = self.store.clone();
            let stale_timeout = gw.stale_timeout();
            loops.push((
                "status",
                tokio::spawn(async move {
                    if let Err(e) = status::serve(&bind, store, stale_timeout).await {
                        tracing::error!("status api stopped: {e:#}");
                    }
                }),
            ));
        }

        tracing::info!(
            loops = ?loops.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "gateway running"
        );
        GatewayTasks { receive, loops }
    }
}

pub struct GatewayTasks {
    receive: JoinHandle<RadioError>,
    loops: Vec<(&'static str, JoinHandle<()>)>,
}

impl GatewayTasks {
    /// Run until `shutdown` resolves or the radio goes away, then stop every loop.
    pub async fn run_until<F: Future>(mut self, shutdown: F) -> Result<(), RadioError> {
        let result = tokio::select! {
            _ = shutdown => Ok(()),
            joined = &mut self.receive => match joined {
                Ok(e) => Err(e),
                Err(_) => Err(RadioError::Closed),
            },
        };
        self.abort();
        result
    }

    pub fn abort(&self) {
        self.receive.abort();
        for (_, handle) in &self.loops {
            handle.abort();
        }
    }
}
