//! Raw event producers
//!
//! Every producer yields batches of `RawEvent` and knows nothing about
//! deduplication or ordering; that is the ingester's job.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tipstream_core::{unix_now, Amount, PayerId, Result, TipMode, TipstreamError};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ports::{TipHistorySource, VolumeSnapshotSource};
use crate::types::{HistoricalTip, RawEvent, VolumeSnapshot};

/// Upper bound on events drained from a push stream in one batch
const MAX_PUSH_BATCH: usize = 256;

#[async_trait]
pub trait RawEventSource: Send {
    fn name(&self) -> &'static str;

    /// Next batch of events. `Ok(None)` means the producer is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<RawEvent>>>;
}

/// Discrete notifications pushed by the ledger adapter
pub struct LedgerEventStream {
    rx: mpsc::Receiver<RawEvent>,
}

impl LedgerEventStream {
    pub fn new(rx: mpsc::Receiver<RawEvent>) -> Self {
        Self { rx }
    }

    /// Channel pair for an adapter that pushes events as they arrive
    pub fn channel(buffer: usize) -> (mpsc::Sender<RawEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl RawEventSource for LedgerEventStream {
    fn name(&self) -> &'static str {
        "ledger-events"
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<RawEvent>>> {
        let first = match self.rx.recv().await {
            Some(event) => event,
            None => return Ok(None),
        };

        // Drain whatever else already arrived so a burst lands as one batch
        let mut batch = vec![first];
        while batch.len() < MAX_PUSH_BATCH {
            match self.rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        Ok(Some(batch))
    }
}

/// Degraded mode: synthesizes events from growth of the aggregate volume
/// counters. The payer of a synthesized event cannot be known and is always
/// the unknown-payer sentinel.
pub struct SnapshotDiffSource {
    source: Arc<dyn VolumeSnapshotSource>,
    ticker: Interval,
    baseline: Option<VolumeSnapshot>,
}

impl SnapshotDiffSource {
    pub fn new(source: Arc<dyn VolumeSnapshotSource>, poll: Duration) -> Self {
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            source,
            ticker,
            baseline: None,
        }
    }

    /// Events implied by moving from the current baseline to `snapshot`
    pub fn diff(&mut self, snapshot: VolumeSnapshot) -> Vec<RawEvent> {
        let Some(previous) = self.baseline.replace(snapshot) else {
            debug!(
                instant = %snapshot.instant_volume_total,
                stream = %snapshot.stream_volume_total,
                "Volume baseline established"
            );
            return Vec::new();
        };

        let mut events = Vec::new();
        for (mode, before, after) in [
            (TipMode::Instant, previous.instant_volume_total, snapshot.instant_volume_total),
            (TipMode::Stream, previous.stream_volume_total, snapshot.stream_volume_total),
        ] {
            if after < before {
                warn!(
                    mode = %mode,
                    before = %before,
                    after = %after,
                    "Volume counter went backwards, re-baselining"
                );
                continue;
            }
            let delta = after - before;
            if delta == 0 {
                continue;
            }
            // Observation time plus cumulative total identifies the step, so
            // re-reading the same snapshot deduplicates but climbing back to
            // an earlier total after a regression does not
            let source_id = format!("snapshot:{}:{}:{}", mode, snapshot.observed_at, after);
            events.push(RawEvent::new(None, delta, snapshot.observed_at, source_id, mode));
        }
        events
    }
}

#[async_trait]
impl RawEventSource for SnapshotDiffSource {
    fn name(&self) -> &'static str {
        "volume-snapshots"
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<RawEvent>>> {
        self.ticker.tick().await;
        let snapshot = self.source.read_volume_snapshot().await?;
        Ok(Some(self.diff(snapshot)))
    }
}

/// One-shot read of the ledger's recent tips at start-up
pub struct HistorySource {
    source: Arc<dyn TipHistorySource>,
    room_id: Option<u64>,
    limit: usize,
    done: bool,
}

impl HistorySource {
    pub fn new(source: Arc<dyn TipHistorySource>, room_id: Option<u64>, limit: usize) -> Self {
        Self {
            source,
            room_id,
            limit,
            done: false,
        }
    }

    /// The ledger index keys the event, so a second read deduplicates while
    /// equal tips in the same second stay distinct
    pub fn to_raw(tip: &HistoricalTip) -> RawEvent {
        let payer = PayerId::new(tip.tipper.as_str());
        let source_id = format!("history:{}", tip.index);
        RawEvent::new(Some(&payer), tip.amount, tip.timestamp, source_id, TipMode::Instant)
            .with_room(tip.room_id)
    }
}

#[async_trait]
impl RawEventSource for HistorySource {
    fn name(&self) -> &'static str {
        "tip-history"
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<RawEvent>>> {
        if self.done {
            return Ok(None);
        }

        let tips = match self.source.read_recent_tips(self.room_id, self.limit).await {
            Ok(tips) => tips,
            // Zero data from the ledger simply means nothing was tipped yet
            Err(TipstreamError::Decode(reason)) => {
                debug!(reason = %reason, "No tip history available");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        self.done = true;
        info!(tips = tips.len(), room_id = ?self.room_id, "Loaded tip history");
        Ok(Some(tips.iter().map(Self::to_raw).collect()))
    }
}

/// Random tips from a fixed payer pool, for demo mode
pub struct MockEventSource {
    payers: Vec<PayerId>,
    room_id: Option<u64>,
    ticker: Interval,
    rng: StdRng,
}

impl MockEventSource {
    pub fn new(payers: Vec<PayerId>, period: Duration) -> Self {
        Self::with_rng(payers, period, StdRng::from_entropy())
    }

    pub fn seeded(payers: Vec<PayerId>, period: Duration, seed: u64) -> Self {
        Self::with_rng(payers, period, StdRng::seed_from_u64(seed))
    }

    fn with_rng(payers: Vec<PayerId>, period: Duration, rng: StdRng) -> Self {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            payers,
            room_id: None,
            ticker,
            rng,
        }
    }

    pub fn with_room(mut self, room_id: Option<u64>) -> Self {
        self.room_id = room_id;
        self
    }

    /// 0.001 to 0.1 of the native unit, in smallest units
    pub fn generate(&mut self) -> RawEvent {
        let payer = if self.payers.is_empty() {
            PayerId::unknown()
        } else {
            self.payers[self.rng.gen_range(0..self.payers.len())].clone()
        };
        let amount: Amount = self.rng.gen_range(1..=100u128) * 1_000_000_000_000_000;
        let mode = if self.rng.gen_bool(0.3) {
            TipMode::Stream
        } else {
            TipMode::Instant
        };
        let source_id = format!("mock:{}", uuid::Uuid::new_v4());

        let event = RawEvent::new(Some(&payer), amount, unix_now(), source_id, mode);
        match self.room_id {
            Some(room_id) => event.with_room(room_id),
            None => event,
        }
    }
}

#[async_trait]
impl RawEventSource for MockEventSource {
    fn name(&self) -> &'static str {
        "mock-events"
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<RawEvent>>> {
        self.ticker.tick().await;
        Ok(Some(vec![self.generate()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::EventIngester;
    use crate::leaderboard::rank;
    use crate::metrics::EngineMetrics;
    use crate::ports::TipTransactions;
    use crate::simulated::SimulatedLedger;
    use crate::types::TipEvent;
    use async_trait::async_trait;

    struct FixedSnapshot(VolumeSnapshot);

    #[async_trait]
    impl VolumeSnapshotSource for FixedSnapshot {
        async fn read_volume_snapshot(&self) -> Result<VolumeSnapshot> {
            Ok(self.0)
        }
    }

    struct EmptyHistory;

    #[async_trait]
    impl TipHistorySource for EmptyHistory {
        async fn read_recent_tips(
            &self,
            _room_id: Option<u64>,
            _limit: usize,
        ) -> Result<Vec<HistoricalTip>> {
            Err(TipstreamError::Decode("returned no data (0x)".into()))
        }
    }

    fn snapshot(instant: Amount, stream: Amount, at: u64) -> VolumeSnapshot {
        VolumeSnapshot {
            instant_volume_total: instant,
            stream_volume_total: stream,
            observed_at: at,
        }
    }

    fn diff_source() -> SnapshotDiffSource {
        SnapshotDiffSource::new(
            Arc::new(FixedSnapshot(VolumeSnapshot::default())),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_first_snapshot_only_sets_baseline() {
        let mut source = diff_source();
        assert!(source.diff(snapshot(100, 50, 1)).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_growth_becomes_unknown_payer_events() {
        let mut source = diff_source();
        source.diff(snapshot(100, 50, 1));
        let events = source.diff(snapshot(130, 50, 6));
        assert_eq!(events.len(), 1);

        let tip = TipEvent::try_from(&events[0]).unwrap();
        assert!(tip.payer.is_unknown());
        assert_eq!(tip.amount, 30);
        assert_eq!(tip.mode, TipMode::Instant);
        assert_eq!(tip.timestamp, 6);

        let events = source.diff(snapshot(130, 70, 11));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].mode, TipMode::Stream);
    }

    #[tokio::test]
    async fn test_counter_regression_rebaselines() {
        let mut source = diff_source();
        source.diff(snapshot(100, 0, 1));
        assert!(source.diff(snapshot(40, 0, 2)).is_empty());
        let events = source.diff(snapshot(45, 0, 3));
        assert_eq!(events[0].amount, "5");
    }

    #[tokio::test]
    async fn test_recovered_counter_repeating_a_total_is_a_new_step() {
        let mut source = diff_source();
        source.diff(snapshot(100, 0, 1));
        let first = source.diff(snapshot(130, 0, 2));
        source.diff(snapshot(100, 0, 3));
        let second = source.diff(snapshot(130, 0, 4));

        let mut ingester = EventIngester::new(10, Arc::new(EngineMetrics::new()));
        let report = ingester.ingest(first.into_iter().chain(second).collect());
        assert_eq!(report.accepted, 2);
        assert_eq!(report.duplicates, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_source_polls() {
        let mut source = SnapshotDiffSource::new(
            Arc::new(FixedSnapshot(snapshot(10, 10, 1))),
            Duration::from_secs(5),
        );
        assert_eq!(source.next_batch().await.unwrap(), Some(Vec::new()));
        assert_eq!(source.next_batch().await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_history_zero_data_is_empty_history() {
        let mut source = HistorySource::new(Arc::new(EmptyHistory), None, 50);
        assert_eq!(source.next_batch().await.unwrap(), Some(Vec::new()));
        assert_eq!(source.next_batch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_history_keeps_equal_tips_from_one_split() {
        let ledger = Arc::new(SimulatedLedger::new());
        ledger.set_time(900);
        let payer = PayerId::new("0xfeed");
        ledger.submit_multiple_tips(&payer, 1, 9, 3).await.unwrap();

        let mut source = HistorySource::new(ledger.clone(), None, 50);
        let batch = source.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 3);

        let mut ingester = EventIngester::new(10, Arc::new(EngineMetrics::new()));
        let report = ingester.ingest(batch.clone());
        assert_eq!(report.accepted, 3);
        assert_eq!(report.duplicates, 0);

        let ranked = rank(&ingester.snapshot(), 10);
        assert_eq!(ranked[0].total_amount, 9);
        assert_eq!(ranked[0].tip_count, 3);

        // Reading the same history again adds nothing
        assert_eq!(ingester.ingest(batch).duplicates, 3);
    }

    #[test]
    fn test_history_source_ids_are_stable() {
        let tip = HistoricalTip {
            index: 41,
            room_id: 2,
            tipper: "0xABC".into(),
            amount: 9,
            timestamp: 77,
        };
        let raw = HistorySource::to_raw(&tip);
        assert_eq!(raw.source_id, "history:41");
        assert_eq!(raw.room_id, Some(2));
        assert_eq!(HistorySource::to_raw(&tip), raw);
    }

    #[tokio::test]
    async fn test_ledger_stream_drains_burst() {
        let (tx, mut stream) = LedgerEventStream::channel(16);
        for i in 0..3u64 {
            tx.send(RawEvent::new(None, 1, i, format!("tx{}", i), TipMode::Instant))
                .await
                .unwrap();
        }
        let batch = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 3);

        drop(tx);
        assert_eq!(stream.next_batch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mock_events_are_well_formed() {
        let payers = vec![PayerId::new("0xa"), PayerId::new("0xb")];
        let mut source =
            MockEventSource::seeded(payers.clone(), Duration::from_secs(1), 7).with_room(Some(3));
        for _ in 0..20 {
            let tip = TipEvent::try_from(&source.generate()).unwrap();
            assert!(payers.contains(&tip.payer));
            assert!(tip.amount >= 1_000_000_000_000_000);
            assert_eq!(tip.room_id, Some(3));
        }
    }
}
