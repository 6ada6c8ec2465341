//! Event Ingester
//!
//! Turns raw payment notifications into a deduplicated, newest-first,
//! bounded event log. Each batch is applied to a copy of the log and the
//! result is published as one value, so readers never observe a log that
//! is mid-update or over capacity.

pub mod sources;

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::metrics::EngineMetrics;
use crate::types::{DedupKey, RawEvent, TipEvent};

pub use sources::{
    HistorySource, LedgerEventStream, MockEventSource, RawEventSource, SnapshotDiffSource,
};

/// Minimum number of accepted keys remembered after eviction
const MIN_KEY_MEMORY: usize = 1024;

/// Point-in-time copy of the bounded log, newest first
pub type FeedSnapshot = Arc<Vec<TipEvent>>;

/// Outcome of one `ingest` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub filtered: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone)]
struct Held {
    event: TipEvent,
    /// Arrival order, breaks timestamp ties
    seq: u64,
}

pub struct EventIngester {
    capacity: usize,
    room_filter: Option<u64>,
    entries: Vec<Held>,
    next_seq: u64,
    /// Keys of recently accepted events, so a late redelivery of an
    /// already-evicted event is still recognised
    remembered: HashSet<DedupKey>,
    remembered_order: VecDeque<DedupKey>,
    key_memory: usize,
    feed: watch::Sender<FeedSnapshot>,
    metrics: Arc<EngineMetrics>,
}

impl EventIngester {
    pub fn new(capacity: usize, metrics: Arc<EngineMetrics>) -> Self {
        let (feed, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            capacity: capacity.max(1),
            room_filter: None,
            entries: Vec::with_capacity(capacity),
            next_seq: 0,
            remembered: HashSet::new(),
            remembered_order: VecDeque::new(),
            key_memory: capacity.saturating_mul(4).max(MIN_KEY_MEMORY),
            feed,
            metrics,
        }
    }

    /// Keep only events tagged with `room_id`; untagged events still pass
    pub fn with_room_filter(mut self, room_id: Option<u64>) -> Self {
        self.room_filter = room_id;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.feed.subscribe()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.feed.borrow().clone()
    }

    pub fn ingest(&mut self, batch: Vec<RawEvent>) -> IngestReport {
        let mut report = IngestReport::default();
        let mut next = self.entries.clone();
        let mut seen: HashSet<_> = next.iter().map(|held| held.event.dedup_key()).collect();

        for raw in &batch {
            let event = match TipEvent::try_from(raw) {
                Ok(event) => event,
                Err(e) => {
                    report.malformed += 1;
                    warn!(source_id = %raw.source_id, error = %e, "Dropping malformed event");
                    continue;
                }
            };

            if let (Some(wanted), Some(room)) = (self.room_filter, event.room_id) {
                if wanted != room {
                    report.filtered += 1;
                    continue;
                }
            }

            let key = event.dedup_key();
            if self.remembered.contains(&key) || !seen.insert(key.clone()) {
                report.duplicates += 1;
                continue;
            }
            self.remember(key);

            self.next_seq += 1;
            next.push(Held {
                event,
                seq: self.next_seq,
            });
            report.accepted += 1;
        }

        if report.accepted > 0 {
            next.sort_by(|a, b| {
                b.event
                    .timestamp
                    .cmp(&a.event.timestamp)
                    .then_with(|| b.seq.cmp(&a.seq))
            });
            if next.len() > self.capacity {
                report.evicted = next.len() - self.capacity;
                next.truncate(self.capacity);
            }

            let published: Vec<TipEvent> = next.iter().map(|held| held.event.clone()).collect();
            self.entries = next;
            self.feed.send_replace(Arc::new(published));
        }

        self.record(&report);
        debug!(
            batch = batch.len(),
            accepted = report.accepted,
            duplicates = report.duplicates,
            malformed = report.malformed,
            filtered = report.filtered,
            evicted = report.evicted,
            held = self.entries.len(),
            "Ingested batch"
        );
        report
    }

    fn remember(&mut self, key: DedupKey) {
        if self.remembered.insert(key.clone()) {
            self.remembered_order.push_back(key);
        }
        while self.remembered_order.len() > self.key_memory {
            if let Some(oldest) = self.remembered_order.pop_front() {
                self.remembered.remove(&oldest);
            }
        }
    }

    fn record(&self, report: &IngestReport) {
        self.metrics.events_accepted.add(report.accepted as u64);
        self.metrics.events_duplicate.add(report.duplicates as u64);
        self.metrics.events_malformed.add(report.malformed as u64);
        self.metrics.events_filtered.add(report.filtered as u64);
        self.metrics.events_evicted.add(report.evicted as u64);
        self.metrics.feed_size.set(self.entries.len() as u64);
    }
}
