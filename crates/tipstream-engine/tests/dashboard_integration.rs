//! Dashboard Integration Tests
//!
//! Runs the full engine against the simulated ledger on a paused clock.

use std::sync::Arc;
use std::time::Duration;
use tipstream_core::{EngineConfig, PayerId, TipMode};
use tipstream_engine::ingest::{LedgerEventStream, SnapshotDiffSource};
use tipstream_engine::{
    DashboardEngine, DashboardWiring, HistoricalTip, PerformanceTracker, RawEvent,
    SimulatedLedger, StartRequest, StreamCheckpoint, StreamState,
};
use tokio::sync::watch;
use tokio::time::timeout;

const VIEWER: &str = "0x00000000000000000000000000000000000000aa";

async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T {
    timeout(Duration::from_secs(120), rx.wait_for(pred))
        .await
        .expect("condition not reached in time")
        .expect("channel closed")
        .clone()
}

fn ledger_at(now: u64) -> Arc<SimulatedLedger> {
    let ledger = Arc::new(SimulatedLedger::new());
    ledger.set_time(now);
    ledger
}

fn tip(payer: &str, amount: u128, ts: u64, source: &str) -> RawEvent {
    RawEvent::new(Some(&PayerId::new(payer)), amount, ts, source, TipMode::Instant)
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_events_rank_once() {
    let ledger = ledger_at(1_000);
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger).without_history(),
    )
    .unwrap();
    let mut board = engine.subscribe_leaderboard();

    let sender = engine.event_sender();
    sender.send(vec![tip("0xa", 5, 10, "x")]).await.unwrap();
    sender.send(vec![tip("0xa", 5, 10, "x")]).await.unwrap();
    sender.send(vec![tip("0xb", 3, 11, "y")]).await.unwrap();

    let board = wait_for(&mut board, |b| b.entries.len() == 2).await;
    assert_eq!(board.entries[0].payer.as_str(), "0xa");
    assert_eq!(board.entries[0].total_amount, 5);
    assert_eq!(board.entries[0].tip_count, 1);
    assert_eq!(board.totals.count, 2);

    assert_eq!(engine.feed().len(), 2);
    assert_eq!(engine.metrics().events_duplicate.get(), 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_equal_totals_keep_ingestion_order() {
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger_at(0)).without_history(),
    )
    .unwrap();
    let mut board = engine.subscribe_leaderboard();

    engine
        .event_sender()
        .send(vec![tip("0xa", 10, 50, "a"), tip("0xb", 10, 50, "b")])
        .await
        .unwrap();

    let board = wait_for(&mut board, |b| b.entries.len() == 2).await;
    assert_eq!(board.entries[0].payer.as_str(), "0xa");
    assert_eq!(board.entries[1].payer.as_str(), "0xb");
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_bootstrap_respects_room_filter() {
    let ledger = ledger_at(500);
    for (room_id, amount, timestamp) in [(1, 10, 100), (2, 20, 200), (1, 30, 300)] {
        ledger.seed_tip(HistoricalTip {
            index: 0,
            room_id,
            tipper: "0xAB".into(),
            amount,
            timestamp,
        });
    }

    let config = EngineConfig {
        room_id: Some(1),
        ..EngineConfig::default()
    };
    let engine = DashboardEngine::start(config, DashboardWiring::simulated(ledger)).unwrap();
    let mut feed = engine.subscribe_feed();

    let feed = wait_for(&mut feed, |f| f.len() == 2).await;
    assert_eq!(feed[0].amount, 30);
    assert_eq!(feed[1].amount, 10);
    assert!(feed.iter().all(|e| e.payer.as_str() == "0xab"));
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_tips_flow_into_feed() {
    let ledger = ledger_at(2_000);
    let events: LedgerEventStream = ledger.subscribe_events(64);
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger.clone())
            .without_history()
            .with_producer(events),
    )
    .unwrap();
    let mut feed = engine.subscribe_feed();

    let payer = PayerId::new("0xC0FFEE");
    let outcome = engine.tipping().send_tip(&payer, 1, 42).await.unwrap();

    let feed = wait_for(&mut feed, |f| !f.is_empty()).await;
    assert_eq!(feed[0].payer, payer);
    assert_eq!(feed[0].source_id, outcome.receipt.tx_hash.as_str());
    assert_eq!(engine.volume_breakdown().instant, 42);
    assert_eq!(engine.tipping().tracker().recent(1).len(), 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_diff_reports_unknown_payer() {
    let ledger = ledger_at(3_000);
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger.clone())
            .without_history()
            .with_producer(SnapshotDiffSource::new(ledger.clone(), Duration::from_secs(5))),
    )
    .unwrap();
    let mut feed = engine.subscribe_feed();

    // Let the first poll establish the baseline
    tokio::time::sleep(Duration::from_secs(1)).await;
    ledger.seed_tip(HistoricalTip {
        index: 0,
        room_id: 1,
        tipper: "0xdd".into(),
        amount: 75,
        timestamp: 3_000,
    });

    let feed = wait_for(&mut feed, |f| !f.is_empty()).await;
    assert!(feed[0].payer.is_unknown());
    assert_eq!(feed[0].amount, 75);
    assert_eq!(feed[0].mode, TipMode::Instant);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_viewer_stream_projection_and_low_balance() {
    let ledger = ledger_at(1_000);
    let viewer = PayerId::new(VIEWER);
    ledger.seed_stream(
        &viewer,
        StreamCheckpoint {
            room_id: 1,
            rate_per_second: 1,
            start_time: 1_000,
            balance_at_checkpoint: 1_000,
            active: true,
        },
    );

    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger.clone())
            .without_history()
            .with_viewer(viewer),
    )
    .unwrap();
    let mut view = engine.subscribe_stream_view();

    let active = wait_for(&mut view, |v| v.state.is_active()).await;
    assert_eq!(active.projection.remaining_balance, 1_000);
    assert!(!active.local_low_balance.is_low);

    ledger.set_time(1_750);
    let low = wait_for(&mut view, |v| {
        v.authoritative
            .map_or(false, |status| status.reading.is_low && !status.stale)
    })
    .await;
    assert_eq!(low.authoritative.map(|s| s.reading.remaining_time), Some(250));

    let local = wait_for(&mut view, |v| v.local_low_balance.is_low).await;
    assert_eq!(local.projection.remaining_time, 250);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopped_stream_is_no_longer_low() {
    let ledger = ledger_at(1_000);
    let viewer = PayerId::new(VIEWER);
    ledger.seed_stream(
        &viewer,
        StreamCheckpoint {
            room_id: 1,
            rate_per_second: 1,
            start_time: 1_000,
            balance_at_checkpoint: 1_000,
            active: true,
        },
    );
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger.clone())
            .without_history()
            .with_viewer(viewer),
    )
    .unwrap();
    let mut view = engine.subscribe_stream_view();

    wait_for(&mut view, |v| v.state.is_active()).await;
    ledger.set_time(1_750);
    wait_for(&mut view, |v| {
        v.state.is_active() && v.authoritative.map_or(false, |s| s.reading.is_low)
    })
    .await;

    engine.viewer().unwrap().stop().await.unwrap();
    let stopped = wait_for(&mut view, |v| !v.state.is_active()).await;
    assert!(stopped.authoritative.map_or(true, |s| !s.reading.is_low));
    assert!(!stopped.local_low_balance.is_low);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let later = engine.stream_view();
    assert!(!later.state.is_active());
    assert!(later.authoritative.map_or(true, |s| !s.reading.is_low));
    assert!(!later.authoritative_stale);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_ledger_never_reports_low() {
    let ledger = ledger_at(1_000);
    let viewer = PayerId::new(VIEWER);
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger.clone())
            .without_history()
            .with_viewer(viewer.clone()),
    )
    .unwrap();

    let controller = engine.viewer().unwrap().clone();
    controller
        .start(StartRequest {
            room_id: 1,
            rate_per_second: 10,
            initial_balance: 1_000,
        })
        .await
        .unwrap();

    ledger.set_offline(true);
    ledger.set_time(1_095);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let view = engine.stream_view();
    assert!(view.authoritative.map_or(true, |s| !s.reading.is_low || s.stale));
    assert!(view.authoritative_stale);
    assert!(engine.metrics().stale_low_balance_readings.get() > 0);
    assert!(engine.metrics().checkpoint_refresh_failures.get() > 0);
    // Local state survives the outage
    assert!(matches!(controller.state(), StreamState::Active(_)));

    ledger.set_offline(false);
    tokio::time::sleep(Duration::from_secs(30)).await;
    let view = engine.stream_view();
    assert!(!view.authoritative_stale);
    assert!(view.authoritative.map_or(false, |s| s.reading.is_low && !s.stale));
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_through_engine_settles_from_receipt() {
    let ledger = ledger_at(100);
    let viewer = PayerId::new(VIEWER);
    let events = ledger.subscribe_events(64);
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger.clone())
            .without_history()
            .with_producer(events)
            .with_viewer(viewer.clone()),
    )
    .unwrap();
    let controller = engine.lifecycle().controller(&viewer);

    controller
        .start(StartRequest {
            room_id: 1,
            rate_per_second: 3,
            initial_balance: 300,
        })
        .await
        .unwrap();
    ledger.set_time(120);
    let outcome = controller.stop().await.unwrap();
    assert_eq!(outcome.settled_amount, Some(60));

    let mut feed = engine.subscribe_feed();
    let feed = wait_for(&mut feed, |f| !f.is_empty()).await;
    assert_eq!(feed[0].mode, TipMode::Stream);
    assert_eq!(feed[0].amount, 60);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_task() {
    let ledger = ledger_at(0);
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger).with_viewer(PayerId::new(VIEWER)),
    )
    .unwrap();

    let names = engine.task_names();
    assert!(names.contains(&"ingest"));
    assert!(names.contains(&"tip-history"));
    assert!(names.contains(&"checkpoint-refresh"));
    assert!(names.contains(&"projection"));
    assert!(names.contains(&"low-balance"));

    let sender = engine.event_sender();
    engine.shutdown().await;
    // Ingest worker is gone, so nothing receives batches any more
    assert!(sender.send(vec![tip("0xa", 1, 1, "late")]).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_injected_tracker_records_tips() {
    let tracker = Arc::new(PerformanceTracker::new());
    let engine = DashboardEngine::start(
        EngineConfig::default(),
        DashboardWiring::simulated(ledger_at(10))
            .without_history()
            .with_tracker(tracker.clone()),
    )
    .unwrap();

    engine
        .tipping()
        .send_tip(&PayerId::new("0xbeef"), 1, 7)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(engine.tipping().tracker(), &tracker));
    assert_eq!(tracker.recent(10).len(), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = EngineConfig {
        feed_capacity: 0,
        ..EngineConfig::default()
    };
    let wiring = DashboardWiring::simulated(ledger_at(0));
    assert!(DashboardEngine::start(config, wiring).is_err());
}
