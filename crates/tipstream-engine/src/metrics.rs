//! Engine metrics sink
//!
//! Built once by the owner of the engine and passed to each component.

use tipstream_telemetry::{Counter, Gauge};

#[derive(Debug, Clone)]
pub struct EngineMetrics {
    pub events_accepted: Counter,
    pub events_duplicate: Counter,
    pub events_malformed: Counter,
    pub events_filtered: Counter,
    pub events_evicted: Counter,
    pub feed_size: Gauge,
    pub checkpoint_refresh_failures: Counter,
    pub stale_low_balance_readings: Counter,
    pub stale_responses_discarded: Counter,
    pub lifecycle_confirmed: Counter,
    pub lifecycle_failed: Counter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            events_accepted: Counter::new("events_accepted"),
            events_duplicate: Counter::new("events_duplicate"),
            events_malformed: Counter::new("events_malformed"),
            events_filtered: Counter::new("events_filtered"),
            events_evicted: Counter::new("events_evicted"),
            feed_size: Gauge::new("feed_size"),
            checkpoint_refresh_failures: Counter::new("checkpoint_refresh_failures"),
            stale_low_balance_readings: Counter::new("stale_low_balance_readings"),
            stale_responses_discarded: Counter::new("stale_responses_discarded"),
            lifecycle_confirmed: Counter::new("lifecycle_confirmed"),
            lifecycle_failed: Counter::new("lifecycle_failed"),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
