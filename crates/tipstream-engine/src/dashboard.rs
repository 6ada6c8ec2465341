//! Dashboard runtime
//!
//! Wires producers, the ingester, the leaderboard and (for a viewer with a
//! stream) the refresh, projection and low-balance timers into a set of
//! cancellable tasks. Readers get point-in-time snapshots over `watch`.

use async_trait::async_trait;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tipstream_core::{EngineConfig, PayerId, Result, UnixSeconds};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::ingest::{EventIngester, FeedSnapshot, HistorySource, RawEventSource};
use crate::leaderboard::{Leaderboard, LeaderboardAggregator, VolumeBreakdown};
use crate::lifecycle::{LifecycleRegistry, StreamLifecycleController, StreamState};
use crate::metrics::EngineMetrics;
use crate::monitor::{LowBalanceMonitor, LowBalanceStatus};
use crate::performance::PerformanceTracker;
use crate::ports::{
    CheckpointSource, LifecycleTransactions, LowBalanceSource, TipHistorySource, TipTransactions,
};
use crate::projector::project;
use crate::scheduler::{spawn_periodic, spawn_worker, TaskHandle, Worker};
use crate::simulated::SimulatedLedger;
use crate::tipping::TipSubmitter;
use crate::types::{LowBalanceReading, ProjectedState, RawEvent, StreamCheckpoint};

const BATCH_QUEUE: usize = 64;

/// Source of "now" for projections
pub type Clock = Arc<dyn Fn() -> UnixSeconds + Send + Sync>;

/// External collaborators the engine runs against
pub struct DashboardWiring {
    pub checkpoints: Arc<dyn CheckpointSource>,
    pub low_balance: Arc<dyn LowBalanceSource>,
    pub lifecycle: Arc<dyn LifecycleTransactions>,
    pub tips: Arc<dyn TipTransactions>,
    pub history: Option<Arc<dyn TipHistorySource>>,
    pub producers: Vec<Box<dyn RawEventSource>>,
    /// Payer whose own stream is tracked, if any
    pub viewer: Option<PayerId>,
    /// Receives every tip submitted through the engine
    pub tracker: Arc<PerformanceTracker>,
    pub clock: Clock,
}

impl DashboardWiring {
    /// Every port served by one simulated ledger, on the ledger's clock
    pub fn simulated(ledger: Arc<SimulatedLedger>) -> Self {
        let clock_source = ledger.clone();
        Self {
            checkpoints: ledger.clone(),
            low_balance: ledger.clone(),
            lifecycle: ledger.clone(),
            tips: ledger.clone(),
            history: Some(ledger),
            producers: Vec::new(),
            viewer: None,
            tracker: Arc::new(PerformanceTracker::new()),
            clock: Arc::new(move || clock_source.now()),
        }
    }

    pub fn with_producer(mut self, producer: impl RawEventSource + 'static) -> Self {
        self.producers.push(Box::new(producer));
        self
    }

    pub fn with_viewer(mut self, viewer: PayerId) -> Self {
        self.viewer = Some(viewer);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<PerformanceTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn without_history(mut self) -> Self {
        self.history = None;
        self
    }
}

/// The viewer's stream as last derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamView {
    pub state: StreamState,
    pub projection: ProjectedState,
    /// Local verdict, refreshed with the projection
    pub local_low_balance: LowBalanceReading,
    /// Last authoritative verdict, re-flagged `stale` when a later check failed
    pub authoritative: Option<LowBalanceStatus>,
    /// The latest authoritative check failed, whether or not an earlier
    /// verdict exists
    pub authoritative_stale: bool,
    pub updated_at: UnixSeconds,
}

impl Default for StreamView {
    fn default() -> Self {
        Self {
            state: StreamState::Inactive,
            projection: ProjectedState::default(),
            local_low_balance: LowBalanceReading::default(),
            authoritative: None,
            authoritative_stale: false,
            updated_at: 0,
        }
    }
}

struct IngestWorker {
    ingester: EventIngester,
    batches: mpsc::Receiver<Vec<RawEvent>>,
    aggregator: LeaderboardAggregator,
    leaderboard: watch::Sender<Arc<Leaderboard>>,
}

#[async_trait]
impl Worker for IngestWorker {
    fn name(&self) -> &'static str {
        "ingest"
    }

    async fn step(&mut self) -> ControlFlow<()> {
        let Some(batch) = self.batches.recv().await else {
            return ControlFlow::Break(());
        };
        let report = self.ingester.ingest(batch);
        if report.accepted > 0 {
            let board = self.aggregator.compute(&self.ingester.snapshot());
            self.leaderboard.send_replace(Arc::new(board));
        }
        ControlFlow::Continue(())
    }
}

struct ProducerWorker {
    source: Box<dyn RawEventSource>,
    batches: mpsc::Sender<Vec<RawEvent>>,
    retry_after: Duration,
}

#[async_trait]
impl Worker for ProducerWorker {
    fn name(&self) -> &'static str {
        self.source.name()
    }

    async fn step(&mut self) -> ControlFlow<()> {
        match self.source.next_batch().await {
            Ok(Some(batch)) => {
                if !batch.is_empty() && self.batches.send(batch).await.is_err() {
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            }
            Ok(None) => {
                debug!(producer = self.source.name(), "Producer exhausted");
                ControlFlow::Break(())
            }
            Err(e) => {
                warn!(producer = self.source.name(), error = %e, "Producer read failed, retrying");
                tokio::time::sleep(self.retry_after).await;
                ControlFlow::Continue(())
            }
        }
    }
}

pub struct DashboardEngine {
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
    feed: watch::Receiver<FeedSnapshot>,
    leaderboard: watch::Receiver<Arc<Leaderboard>>,
    stream_view: watch::Receiver<StreamView>,
    batches: mpsc::Sender<Vec<RawEvent>>,
    lifecycle: Arc<LifecycleRegistry>,
    viewer: Option<Arc<StreamLifecycleController>>,
    tipping: Arc<TipSubmitter>,
    tasks: Vec<TaskHandle>,
}

impl DashboardEngine {
    pub fn start(config: EngineConfig, wiring: DashboardWiring) -> Result<Self> {
        config.validate()?;
        let chain = config.chain()?;
        let metrics = Arc::new(EngineMetrics::new());
        let mut tasks = Vec::new();

        let ingester = EventIngester::new(config.feed_capacity, metrics.clone())
            .with_room_filter(config.room_id);
        let feed = ingester.subscribe();
        let (leaderboard_tx, leaderboard) = watch::channel(Arc::new(Leaderboard::default()));
        let (batches, batch_rx) = mpsc::channel(BATCH_QUEUE);

        tasks.push(spawn_worker(IngestWorker {
            ingester,
            batches: batch_rx,
            aggregator: LeaderboardAggregator::new(config.leaderboard_window, config.leaderboard_size),
            leaderboard: leaderboard_tx,
        }));

        let mut producers = wiring.producers;
        if let Some(history) = wiring.history {
            producers.insert(
                0,
                Box::new(HistorySource::new(history, config.room_id, config.history_limit)),
            );
        }
        for source in producers {
            info!(producer = source.name(), "Starting event producer");
            tasks.push(spawn_worker(ProducerWorker {
                source,
                batches: batches.clone(),
                retry_after: config.snapshot_poll(),
            }));
        }

        let lifecycle = Arc::new(LifecycleRegistry::new(
            wiring.lifecycle,
            wiring.checkpoints,
            metrics.clone(),
        ));
        let (view_tx, stream_view) = watch::channel(StreamView::default());
        let viewer = wiring.viewer.map(|payer| lifecycle.controller(&payer));

        if let Some(controller) = &viewer {
            let monitor = Arc::new(LowBalanceMonitor::new(
                controller.payer().clone(),
                config.low_balance_horizon_secs,
                wiring.low_balance,
                metrics.clone(),
            ));
            let view_tx = Arc::new(view_tx);
            tasks.extend(spawn_viewer_tasks(
                &config,
                controller.clone(),
                monitor,
                view_tx,
                wiring.clock,
            ));
        }

        let tipping = Arc::new(TipSubmitter::new(chain, wiring.tips, wiring.tracker));

        info!(
            chain = chain.name(),
            room_id = ?config.room_id,
            feed_capacity = config.feed_capacity,
            tasks = tasks.len(),
            "Dashboard engine started"
        );

        Ok(Self {
            config,
            metrics,
            feed,
            leaderboard,
            stream_view,
            batches,
            lifecycle,
            viewer,
            tipping,
            tasks,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn feed(&self) -> FeedSnapshot {
        self.feed.borrow().clone()
    }

    pub fn subscribe_feed(&self) -> watch::Receiver<FeedSnapshot> {
        self.feed.clone()
    }

    pub fn leaderboard(&self) -> Arc<Leaderboard> {
        self.leaderboard.borrow().clone()
    }

    pub fn subscribe_leaderboard(&self) -> watch::Receiver<Arc<Leaderboard>> {
        self.leaderboard.clone()
    }

    pub fn stream_view(&self) -> StreamView {
        *self.stream_view.borrow()
    }

    pub fn subscribe_stream_view(&self) -> watch::Receiver<StreamView> {
        self.stream_view.clone()
    }

    pub fn volume_breakdown(&self) -> VolumeBreakdown {
        VolumeBreakdown::from_feed(&self.feed())
    }

    /// Feed events in directly, as one more producer would
    pub fn event_sender(&self) -> mpsc::Sender<Vec<RawEvent>> {
        self.batches.clone()
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleRegistry> {
        &self.lifecycle
    }

    pub fn viewer(&self) -> Option<&Arc<StreamLifecycleController>> {
        self.viewer.as_ref()
    }

    pub fn tipping(&self) -> &Arc<TipSubmitter> {
        &self.tipping
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(TaskHandle::name).collect()
    }

    /// Stop every task and wait for them. Reads still in flight are
    /// invalidated first so their results are never committed.
    pub async fn shutdown(self) {
        if let Some(controller) = &self.viewer {
            controller.invalidate_pending_reads();
        }
        let count = self.tasks.len();
        for task in self.tasks.into_iter().rev() {
            task.cancel().await;
        }
        info!(tasks = count, "Dashboard engine stopped");
    }
}

fn spawn_viewer_tasks(
    config: &EngineConfig,
    controller: Arc<StreamLifecycleController>,
    monitor: Arc<LowBalanceMonitor>,
    view: Arc<watch::Sender<StreamView>>,
    clock: Clock,
) -> Vec<TaskHandle> {
    let refresh = {
        let controller = controller.clone();
        spawn_periodic("checkpoint-refresh", config.checkpoint_refresh(), move || {
            let controller = controller.clone();
            async move {
                if let Err(e) = controller.refresh().await {
                    warn!(payer = %controller.payer(), error = %e, "Checkpoint refresh failed");
                }
            }
        })
    };

    let projection = {
        let controller = controller.clone();
        let monitor = monitor.clone();
        let view = view.clone();
        let clock = clock.clone();
        spawn_periodic("projection", config.projection_tick(), move || {
            let controller = controller.clone();
            let monitor = monitor.clone();
            let view = view.clone();
            let now = clock();
            async move {
                controller.mark_exhausted(now);
                let state = controller.state();
                let (projection, local_low_balance) = match state.checkpoint() {
                    Some(checkpoint) => (
                        project(checkpoint, now),
                        monitor.evaluate_local(checkpoint, now).reading,
                    ),
                    None => (ProjectedState::default(), LowBalanceReading::default()),
                };
                view.send_modify(|current| {
                    current.state = state;
                    current.projection = projection;
                    current.local_low_balance = local_low_balance;
                    current.updated_at = now;
                    // A stopped or exhausted stream is never low
                    if !state.is_active() {
                        current.authoritative =
                            Some(monitor.evaluate_local(&StreamCheckpoint::default(), now));
                        current.authoritative_stale = false;
                    }
                });
            }
        })
    };

    let low_balance = spawn_periodic("low-balance", config.low_balance_check(), move || {
        let controller = controller.clone();
        let monitor = monitor.clone();
        let view = view.clone();
        let now = clock();
        async move {
            // Inactive resolves locally to a not-low status
            let checkpoint = controller.state().checkpoint().copied().unwrap_or_default();
            let (authoritative, stale) = match monitor.check(&checkpoint, now).await {
                Ok(status) => (Some(status), false),
                Err(stale) => (stale.last_known, true),
            };
            view.send_modify(|current| {
                current.authoritative = authoritative;
                current.authoritative_stale = stale;
            });
        }
    });

    vec![refresh, projection, low_balance]
}
