//! wall-clock helpers
//!
//! staleness uses `tokio::time::Instant` (monotonic, pausable in tests);
//! only the timestamps that leave the gateway use the wall clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// current unix time in milliseconds
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
