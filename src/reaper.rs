//! Gateway staleness reaper
//!
//! Evicts every sender that has been silent for at least the staleness
//! timeout. Nothing is kept about an evicted sender; if it starts
//! transmitting again it comes back as a new entry.

use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::domain::SenderId;
use crate::store::AggregationStore;

pub struct Reaper {
    store: AggregationStore,
    timeout: Duration,
}

impl Reaper {
    pub fn new(store: AggregationStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// One pass as of `now`. Returns the evicted sender ids.
    pub fn run_cycle(&self, now: Instant) -> Vec<SenderId> {
        let evicted = self.store.evict_stale(now, self.timeout);
        for entry in &evicted {
            tracing::info!(
                sender_id = entry.sender_id,
                silent_ms = now.saturating_duration_since(entry.last_seen_at).as_millis() as u64,
                "sender stale, evicted"
            );
        }
        evicted.into_iter().map(|e| e.sender_id).collect()
    }

    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_cycle(Instant::now());
        }
    }
}
