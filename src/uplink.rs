//! Gateway uplink batcher
//!
//! Every batch cycle: snapshot the store, turn each live entry into an
//! [`UplinkRecord`] stamped with the gateway's wall clock, and POST the whole
//! array once. An empty store means no request at all. A failed POST is
//! logged and the batch dropped; the store still holds the latest state and
//! the next cycle carries it.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backend::Backend;
use crate::clock;
use crate::domain::UplinkRecord;
use crate::store::{AggregationEntry, AggregationStore};

/// What one batch cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    /// nothing live, no request made
    Skipped,
    Sent(usize),
    Dropped(usize),
}

/// One record per entry, all carrying the same gateway timestamp.
pub fn build_batch(entries: &[AggregationEntry], gateway_timestamp_ms: u64) -> Vec<UplinkRecord> {
    entries
        .iter()
        .map(|e| UplinkRecord::from_reading(&e.latest_reading, gateway_timestamp_ms))
        .collect()
}

pub struct UplinkBatcher<B> {
    store: AggregationStore,
    backend: Arc<B>,
    stale_timeout: Duration,
}

impl<B: Backend> UplinkBatcher<B> {
    pub fn new(store: AggregationStore, backend: Arc<B>, stale_timeout: Duration) -> Self {
        Self {
            store,
            backend,
            stale_timeout,
        }
    }

    /// Entries that are past the timeout but not yet reaped are left out.
    pub async fn run_cycle(&self) -> UplinkOutcome {
        let now = Instant::now();
        let live: Vec<AggregationEntry> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|e| !e.is_stale(now, self.stale_timeout))
            .collect();

        if live.is_empty() {
            tracing::debug!("uplink: store empty, nothing to send");
            return UplinkOutcome::Skipped;
        }

        let batch = build_batch(&live, clock::unix_timestamp_ms());

        match self.backend.post_batch(&batch).await {
            Ok(()) => {
                tracing::debug!(records = batch.len(), "uplink batch sent");
                UplinkOutcome::Sent(batch.len())
            }
            Err(e) => {
                tracing::warn!(records = batch.len(), "uplink batch dropped: {e}");
                UplinkOutcome::Dropped(batch.len())
            }
        }
    }

    /// First cycle fires one period after start.
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
    use crate::backend::CommandPoll;
    use crate::domain::{ReadingRecord, SenderId};
    use crate::error::BackendError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        batches: Mutex<Vec<Vec<UplinkRecord>>>,
        fail: bool,
    }

    impl Backend for RecordingBackend {
        async fn post_batch(&self, batch: &[UplinkRecord]) -> Result<(), BackendError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            if self.fail {
                return Err(BackendError::Status(500));
            }
            Ok(())
        }

        async fn poll_command(&self, _station_id: SenderId) -> Result<CommandPoll, BackendError> {
            Ok(CommandPoll::Empty)
        }
    }

    fn reading(sender_id: SenderId) -> ReadingRecord {
        ReadingRecord {
            sender_id,
            light_raw: 900 + sender_id,
            dht_temperature: 25.0,
            dht_humidity: 40.0,
            thermistor_temperature: 31.5,
            voltage: 20.1,
            current: 5.2,
            valid: true,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(25);

    #[tokio::test]
    async fn test_empty_store_makes_no_request() {
        let backend = Arc::new(RecordingBackend::default());
        let batcher = UplinkBatcher::new(AggregationStore::new(), backend.clone(), TIMEOUT);

        assert_eq!(batcher.run_cycle().await, UplinkOutcome::Skipped);
        assert!(backend.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_record_per_live_entry() {
        let store = AggregationStore::new();
        let now = Instant::now();
        for id in 1..=3 {
            store.upsert(id, reading(id), now);
        }
        let backend = Arc::new(RecordingBackend::default());
        let batcher = UplinkBatcher::new(store, backend.clone(), TIMEOUT);

        assert_eq!(batcher.run_cycle().await, UplinkOutcome::Sent(3));

        let batches = backend.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let mut batch = batches[0].clone();
        batch.sort_by_key(|r| r.sender_id);
        for (i, record) in batch.iter().enumerate() {
            let sent_at = record.gateway_timestamp_ms;
            let expected = UplinkRecord::from_reading(&reading(i as SenderId + 1), sent_at);
            assert_eq!(*record, expected);
        }
        let ts = batch[0].gateway_timestamp_ms;
        assert!(batch.iter().all(|r| r.gateway_timestamp_ms == ts));
    }

    #[tokio::test]
    async fn test_failed_post_is_dropped_not_queued() {
        let store = AggregationStore::new();
        store.upsert(1, reading(1), Instant::now());
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..Default::default()
        });
        let batcher = UplinkBatcher::new(store.clone(), backend.clone(), TIMEOUT);

        assert_eq!(batcher.run_cycle().await, UplinkOutcome::Dropped(1));
        assert_eq!(batcher.run_cycle().await, UplinkOutcome::Dropped(1));
        // each cycle posts the current snapshot once, nothing accumulates
        let batches = backend.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 1));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreaped_stale_entry_not_sent() {
        let store = AggregationStore::new();
        store.upsert(1, reading(1), Instant::now());
        tokio::time::advance(Duration::from_secs(10)).await;
        store.upsert(2, reading(2), Instant::now());
        tokio::time::advance(Duration::from_secs(16)).await;

        let backend = Arc::new(RecordingBackend::default());
        let batcher = UplinkBatcher::new(store, backend.clone(), TIMEOUT);
        assert_eq!(batcher.run_cycle().await, UplinkOutcome::Sent(1));
        assert_eq!(backend.batches.lock().unwrap()[0][0].sender_id, 2);
    }

    #[test]
    fn test_build_batch_maps_fields() {
        let entry = AggregationEntry {
            sender_id: 4,
            latest_reading: reading(4),
            last_seen_at: Instant::now(),
        };
        let batch = build_batch(&[entry], 42);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].ldr_value, 904);
        assert_eq!(batch[0].thermistor_temp, 31.5);
        assert_eq!(batch[0].gateway_timestamp_ms, 42);
    }
}
