//! Leaderboard Aggregator
//!
//! Pure functions over the current event log. Nothing is carried between
//! calls, so the output always matches the log it was computed from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tipstream_core::{Amount, PayerId, TipMode};

use crate::types::{PayerSummary, TipEvent, VolumeSnapshot};

/// Group by payer, order by total then recency, keep the top `limit`.
///
/// Ties that survive both keys keep first-encounter order.
pub fn rank(events: &[TipEvent], limit: usize) -> Vec<PayerSummary> {
    let mut index: HashMap<&PayerId, usize> = HashMap::new();
    let mut summaries: Vec<PayerSummary> = Vec::new();

    for event in events {
        match index.get(&event.payer) {
            Some(&slot) => {
                let summary = &mut summaries[slot];
                summary.total_amount = summary.total_amount.saturating_add(event.amount);
                summary.tip_count += 1;
                summary.last_tip_time = summary.last_tip_time.max(event.timestamp);
            }
            None => {
                index.insert(&event.payer, summaries.len());
                summaries.push(PayerSummary {
                    payer: event.payer.clone(),
                    total_amount: event.amount,
                    tip_count: 1,
                    last_tip_time: event.timestamp,
                });
            }
        }
    }

    // sort_by is stable
    summaries.sort_by(|a, b| {
        b.total_amount
            .cmp(&a.total_amount)
            .then_with(|| b.last_tip_time.cmp(&a.last_tip_time))
    });
    summaries.truncate(limit);
    summaries
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardTotals {
    pub amount: Amount,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub entries: Vec<PayerSummary>,
    /// Totals over the displayed entries only
    pub totals: LeaderboardTotals,
}

#[derive(Debug, Clone, Copy)]
pub struct LeaderboardAggregator {
    window: usize,
    top_k: usize,
}

impl LeaderboardAggregator {
    pub fn new(window: usize, top_k: usize) -> Self {
        Self { window, top_k }
    }

    /// Rank the `window` most recent events of a newest-first log. The
    /// window is walked oldest arrival first, so full ties keep ingestion
    /// order.
    pub fn compute(&self, feed: &[TipEvent]) -> Leaderboard {
        let considered: Vec<TipEvent> = feed[..feed.len().min(self.window)]
            .iter()
            .rev()
            .cloned()
            .collect();
        let entries = rank(&considered, self.top_k);
        let totals = entries.iter().fold(LeaderboardTotals::default(), |acc, entry| {
            LeaderboardTotals {
                amount: acc.amount.saturating_add(entry.total_amount),
                count: acc.count + entry.tip_count,
            }
        });
        Leaderboard { entries, totals }
    }
}

/// Split of volume between instant tips and streams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBreakdown {
    pub instant: Amount,
    pub stream: Amount,
    pub total: Amount,
    pub instant_pct: u8,
    pub stream_pct: u8,
}

impl VolumeBreakdown {
    pub fn new(instant: Amount, stream: Amount) -> Self {
        let total = instant.saturating_add(stream);
        if total == 0 {
            return Self::default();
        }
        let instant_pct = rounded_percent(instant, total);
        Self {
            instant,
            stream,
            total,
            instant_pct,
            stream_pct: 100 - instant_pct,
        }
    }

    pub fn from_snapshot(snapshot: &VolumeSnapshot) -> Self {
        Self::new(snapshot.instant_volume_total, snapshot.stream_volume_total)
    }

    pub fn from_feed(feed: &[TipEvent]) -> Self {
        let (instant, stream) = feed.iter().fold((0u128, 0u128), |(instant, stream), event| {
            match event.mode {
                TipMode::Instant => (instant.saturating_add(event.amount), stream),
                TipMode::Stream => (instant, stream.saturating_add(event.amount)),
            }
        });
        Self::new(instant, stream)
    }
}

fn rounded_percent(part: Amount, total: Amount) -> u8 {
    // Scale down first so the multiplication cannot overflow
    let shift = (128 - total.leading_zeros()).saturating_sub(120);
    let (part, total) = (part >> shift, (total >> shift).max(1));
    ((part * 100 + total / 2) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn event(payer: &str, amount: Amount, ts: u64) -> TipEvent {
        TipEvent {
            payer: PayerId::new(payer),
            amount,
            timestamp: ts,
            source_id: format!("{}-{}", payer, ts),
            block_number: 0,
            mode: TipMode::Instant,
            room_id: None,
        }
    }

    #[test]
    fn test_aggregates_per_payer() {
        let events = vec![event("0xa", 5, 10), event("0xb", 3, 12), event("0xa", 4, 20)];
        let ranked = rank(&events, 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].payer.as_str(), "0xa");
        assert_eq!(ranked[0].total_amount, 9);
        assert_eq!(ranked[0].tip_count, 2);
        assert_eq!(ranked[0].last_tip_time, 20);
    }

    #[test]
    fn test_single_deduplicated_event() {
        let ranked = rank(&[event("0xa", 5, 10)], 10);
        assert_eq!(
            ranked,
            vec![PayerSummary {
                payer: PayerId::new("0xa"),
                total_amount: 5,
                tip_count: 1,
                last_tip_time: 10,
            }]
        );
    }

    #[test]
    fn test_recency_breaks_amount_ties() {
        let events = vec![event("0xa", 10, 5), event("0xb", 10, 9)];
        let ranked = rank(&events, 10);
        assert_eq!(ranked[0].payer.as_str(), "0xb");
    }

    #[test]
    fn test_full_ties_keep_encounter_order() {
        let events = vec![event("0xa", 10, 7), event("0xb", 10, 7)];
        let ranked = rank(&events, 10);
        assert_eq!(ranked[0].payer.as_str(), "0xa");
        assert_eq!(ranked[1].payer.as_str(), "0xb");
    }

    #[test]
    fn test_truncation_happens_after_aggregation() {
        let mut events = vec![event("0xbig", 100, 1)];
        for ts in 0..5 {
            events.push(event("0xsmall", 1, ts + 10));
        }
        let ranked = rank(&events, 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].payer.as_str(), "0xbig");

        let ranked = rank(&events, 2);
        assert_eq!(ranked[1].tip_count, 5);
    }

    #[test]
    fn test_unknown_payer_aggregates_as_one_row() {
        let mut a = event("0xa", 1, 1);
        a.payer = PayerId::unknown();
        let mut b = event("0xb", 2, 2);
        b.payer = PayerId::unknown();
        let ranked = rank(&[a, b], 10);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].payer.is_unknown());
        assert_eq!(ranked[0].total_amount, 3);
    }

    #[test]
    fn test_aggregator_window_and_totals() {
        // newest first
        let feed = vec![event("0xa", 5, 30), event("0xb", 7, 20), event("0xc", 100, 10)];
        let board = LeaderboardAggregator::new(2, 10).compute(&feed);
        assert_eq!(board.entries.len(), 2);
        assert_eq!(board.entries[0].payer.as_str(), "0xb");
        assert_eq!(board.totals, LeaderboardTotals { amount: 12, count: 2 });

        assert_eq!(LeaderboardAggregator::new(2, 10).compute(&[]), Leaderboard::default());
    }

    #[test]
    fn test_aggregator_full_ties_follow_arrival() {
        // Log order for 0xa arriving before 0xb in the same second
        let feed = vec![event("0xb", 10, 7), event("0xa", 10, 7)];
        let board = LeaderboardAggregator::new(50, 10).compute(&feed);
        assert_eq!(board.entries[0].payer.as_str(), "0xa");
        assert_eq!(board.entries[1].payer.as_str(), "0xb");
    }

    #[test]
    fn test_volume_breakdown() {
        let breakdown = VolumeBreakdown::new(1, 2);
        assert_eq!(breakdown.total, 3);
        assert_eq!(breakdown.instant_pct, 33);
        assert_eq!(breakdown.stream_pct, 67);
        assert_eq!(VolumeBreakdown::new(0, 0), VolumeBreakdown::default());

        let mut stream = event("0xa", 30, 1);
        stream.mode = TipMode::Stream;
        let feed = vec![event("0xa", 10, 2), stream];
        let breakdown = VolumeBreakdown::from_feed(&feed);
        assert_eq!(breakdown.instant, 10);
        assert_eq!(breakdown.stream, 30);
        assert_eq!(breakdown.instant_pct, 25);
    }

    #[test]
    fn test_volume_breakdown_huge_amounts() {
        let breakdown = VolumeBreakdown::new(u128::MAX / 2, u128::MAX / 2);
        assert_eq!(breakdown.instant_pct, 50);
        assert_eq!(breakdown.stream_pct, 50);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn rank_is_deterministic(
            items in prop::collection::vec((0u8..8, 0u128..20, 0u64..10), 0..80),
            limit in 0usize..12,
        ) {
            let events: Vec<TipEvent> = items
                .iter()
                .map(|(payer, amount, ts)| event(&format!("0x{}", payer), *amount, *ts))
                .collect();
            let first = rank(&events, limit);
            let second = rank(&events, limit);
            prop_assert!(first.len() <= limit);
            prop_assert_eq!(first, second);
        }
    }
}
