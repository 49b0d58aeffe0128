//! Gateway aggregation store
//!
//! The keyed table sender id -> (latest reading, last seen). Radio receive
//! (producer) and the uplink batcher and reaper (consumers) share one
//! [`AggregationStore`] handle; every operation takes the same lock, so a
//! snapshot never sees a half-written entry and a staleness check and its
//! removal happen under one lock acquisition. An upsert that lands after an
//! eviction simply recreates the entry.
//!
//! Nothing here touches the network or awaits while holding the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::{ReadingRecord, SenderId};

/// Gateway-owned latest state for one sender
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationEntry {
    pub sender_id: SenderId,
    pub latest_reading: ReadingRecord,
    pub last_seen_at: Instant,
}

impl AggregationEntry {
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen_at) >= timeout
    }
}

/// Whether an upsert created or replaced the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

#[derive(Clone, Default)]
pub struct AggregationStore {
    entries: Arc<Mutex<HashMap<SenderId, AggregationEntry>>>,
}

impl AggregationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SenderId, AggregationEntry>> {
        // a panic elsewhere while holding the lock cannot leave an entry
        // half-written (entries are Copy and replaced whole)
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or fully replace the entry for `sender_id`.
    pub fn upsert(&self, sender_id: SenderId, reading: ReadingRecord, now: Instant) -> Upsert {
        let entry = AggregationEntry {
            sender_id,
            latest_reading: reading,
            last_seen_at: now,
        };
        match self.lock().insert(sender_id, entry) {
            Some(_) => Upsert::Replaced,
            None => Upsert::Inserted,
        }
    }

    /// Consistent copy of every current entry, in no particular order.
    pub fn snapshot(&self) -> Vec<AggregationEntry> {
        self.lock().values().copied().collect()
    }

    pub fn get(&self, sender_id: SenderId) -> Option<AggregationEntry> {
        self.lock().get(&sender_id).copied()
    }

    /// Remove one entry. Returns it if it was present.
    pub fn evict(&self, sender_id: SenderId) -> Option<AggregationEntry> {
        self.lock().remove(&sender_id)
    }

    /// Remove every entry not seen for at least `timeout` as of `now`.
    ///
    /// Decision and removal happen under one lock, so an upsert either lands
    /// before (and the entry is fresh, kept) or after (and recreates it).
    pub fn evict_stale(&self, now: Instant, timeout: Duration) -> Vec<AggregationEntry> {
        let mut entries = self.lock();
        let stale: Vec<SenderId> = entries
            .values()
            .filter(|e| e.is_stale(now, timeout))
            .map(|e| e.sender_id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
