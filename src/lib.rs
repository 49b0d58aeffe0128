//! solar-mesh: sensor nodes and aggregation gateway for a small solar-panel
//! monitoring fleet.
//!
//! A node runs either as a **sender** (samples its panel, transmits a reading
//! to the gateway every interval, and drives a relay on command) or as the
//! **gateway** (keeps the latest reading per sender, uploads batches to the
//! backend, evicts silent senders, and relays backend commands over the
//! radio).

pub mod actuator;
pub mod backend;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod hal;
pub mod radio;
pub mod reaper;
pub mod relay;
pub mod sampling;
pub mod sender;
pub mod status;
pub mod store;
pub mod uplink;
pub mod wire;

pub use config::{NodeConfig, Role};
pub use domain::{Command, ReadingRecord, SenderId, UplinkRecord};
pub use store::AggregationStore;
