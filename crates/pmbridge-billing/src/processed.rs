//! Processed-event markers.
//!
//! A bounded, expiring set of event ids that are being handled or were
//! handled. It only short-circuits duplicate deliveries; the persisted billing
//! row remains the authority on whether an event was synced.

use std::time::Duration;

use moka::future::Cache;

/// Default marker lifetime (3 days).
pub const DEFAULT_TTL_SECS: u64 = 3 * 24 * 60 * 60;

/// Default number of markers kept.
pub const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Clone)]
pub struct ProcessedEvents {
    markers: Cache<String, ()>,
}

impl ProcessedEvents {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CAPACITY, DEFAULT_TTL_SECS)
    }

    pub fn with_config(capacity: u64, ttl_secs: u64) -> Self {
        Self {
            markers: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(Duration::from_secs(ttl_secs))
                .build(),
        }
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.markers.contains_key(event_id)
    }

    /// Inserts the marker unless it is already present. Returns `true` only
    /// for the caller that inserted it.
    pub async fn claim(&self, event_id: &str) -> bool {
        self.markers
            .entry(event_id.to_string())
            .or_insert(())
            .await
            .is_fresh()
    }

    pub async fn mark(&self, event_id: &str) {
        self.markers.insert(event_id.to_string(), ()).await;
    }

    pub async fn forget(&self, event_id: &str) {
        self.markers.invalidate(event_id).await;
    }
}

impl Default for ProcessedEvents {
    fn default() -> Self {
        Self::new()
    }
}
