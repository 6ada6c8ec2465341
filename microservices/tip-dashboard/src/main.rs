//! Tip Dashboard
//!
//! Long-running dashboard process:
//! - Live tip feed and leaderboard from the configured event producer
//! - Viewer stream projection with low-balance detection and auto top-up
//! - Tip confirmation latency tracking
//!
//! Runs against the in-memory ledger; a chain adapter plugs in through the
//! same ports.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tipstream_core::{
    Amount, Chain, EngineConfig, HealthStatus, Result, ServiceRuntime, TipstreamService,
};
use tipstream_engine::ingest::{MockEventSource, SnapshotDiffSource};
use tipstream_engine::{DashboardEngine, DashboardWiring, SimulatedLedger, StartRequest};
use tokio::sync::{Mutex, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

mod config;
mod report;

use config::{DemoConfig, FeedMode};

/// 0.0001 native units per second
const DEMO_RATE: Amount = 100_000_000_000_000;
/// 0.05 native units, roughly eight minutes of streaming
const DEMO_DEPOSIT: Amount = 50_000_000_000_000_000;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env()?;
    if let Err(e) = tipstream_telemetry::init(&config.service_name, &config.log_level) {
        eprintln!("{}", e);
    }

    info!("Starting Tip Dashboard");

    let demo = DemoConfig::from_env()?;
    let service = Arc::new(DashboardService::new(config, demo)?);
    ServiceRuntime::run(service).await
}

pub struct DashboardService {
    config: EngineConfig,
    demo: DemoConfig,
    chain: Chain,
    ledger: Arc<SimulatedLedger>,
    engine: Mutex<Option<DashboardEngine>>,
    stop: Notify,
    start_time: Instant,
}

impl DashboardService {
    pub fn new(config: EngineConfig, demo: DemoConfig) -> Result<Self> {
        config.validate()?;
        let chain = config.chain()?;
        Ok(Self {
            config,
            demo,
            chain,
            ledger: Arc::new(SimulatedLedger::new()),
            engine: Mutex::new(None),
            stop: Notify::new(),
            start_time: Instant::now(),
        })
    }

    fn wiring(&self) -> DashboardWiring {
        let wiring = DashboardWiring::simulated(self.ledger.clone())
            .with_viewer(self.demo.viewer.clone());

        match self.demo.feed_mode {
            FeedMode::Events => wiring.with_producer(self.ledger.subscribe_events(1024)),
            FeedMode::Snapshot => wiring.with_producer(SnapshotDiffSource::new(
                self.ledger.clone(),
                self.config.snapshot_poll(),
            )),
            FeedMode::Mock => wiring.with_producer(
                MockEventSource::new(
                    self.demo.tippers.clone(),
                    Duration::from_secs(self.demo.tip_interval_secs),
                )
                .with_room(self.config.room_id),
            ),
        }
    }

    fn room_id(&self) -> u64 {
        self.config.room_id.unwrap_or(1)
    }

    async fn open_viewer_stream(&self) {
        let controller = match self.engine.lock().await.as_ref().and_then(|e| e.viewer().cloned()) {
            Some(controller) => controller,
            None => return,
        };

        let request = StartRequest {
            room_id: self.room_id(),
            rate_per_second: DEMO_RATE,
            initial_balance: DEMO_DEPOSIT,
        };
        if let Err(e) = controller.start(request).await {
            warn!(error = %e, "Could not open viewer stream");
        }
    }

    /// Keep the viewer's stream alive by topping up once it runs low
    async fn maintain_viewer_stream(&self) {
        let (controller, view) = {
            let guard = self.engine.lock().await;
            let Some(engine) = guard.as_ref() else {
                return;
            };
            report::log_summary(engine, self.chain);
            match engine.viewer() {
                Some(controller) => (controller.clone(), engine.stream_view()),
                None => return,
            }
        };

        if !view.state.is_active() {
            self.open_viewer_stream().await;
        } else if view.local_low_balance.is_low && !controller.is_busy() {
            match controller.top_up(DEMO_DEPOSIT).await {
                Ok(outcome) if outcome.checkpoint.is_none() => {
                    info!("Top-up confirmed, balance pending next refresh")
                }
                Ok(_) => info!("Viewer stream topped up"),
                Err(e) => warn!(error = %e, "Top-up failed"),
            }
        }
    }

    async fn send_demo_tip(&self) {
        let tipping = match self.engine.lock().await.as_ref() {
            Some(engine) => engine.tipping().clone(),
            None => return,
        };

        let (payer, amount) = {
            let mut rng = rand::thread_rng();
            let payer = self.demo.tippers[rng.gen_range(0..self.demo.tippers.len())].clone();
            let amount: Amount = rng.gen_range(1..=50u128) * 1_000_000_000_000_000;
            (payer, amount)
        };

        if let Err(e) = tipping.send_tip(&payer, self.room_id(), amount).await {
            warn!(payer = %payer, error = %e, "Demo tip failed");
        }
    }
}

#[async_trait]
impl TipstreamService for DashboardService {
    fn service_id(&self) -> &'static str {
        "tip-dashboard"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: self.engine.lock().await.is_some(),
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn start(&self) -> Result<()> {
        let engine = DashboardEngine::start(self.config.clone(), self.wiring())?;
        *self.engine.lock().await = Some(engine);
        self.open_viewer_stream().await;

        info!(
            chain = self.chain.name(),
            feed_mode = ?self.demo.feed_mode,
            viewer = %self.demo.viewer,
            "Dashboard running"
        );

        let mut tips = interval(Duration::from_secs(self.demo.tip_interval_secs));
        tips.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reports = interval(Duration::from_secs(self.demo.report_interval_secs));
        reports.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tips.tick(), if self.demo.feed_mode != FeedMode::Mock => {
                    self.send_demo_tip().await;
                }
                _ = reports.tick() => {
                    self.maintain_viewer_stream().await;
                }
                _ = self.stop.notified() => break,
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.stop.notify_one();
        let engine = self.engine.lock().await.take();
        if let Some(engine) = engine {
            engine.shutdown().await;
        }
        Ok(())
    }
}
