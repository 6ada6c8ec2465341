//! Stream Lifecycle Controller
//!
//! Owns one payer's stream state (`Inactive -> Active -> Inactive`) and the
//! three mutations on it. Preconditions are checked before any external call,
//! state only changes after a confirmed receipt, and at most one operation
//! per payer is outstanding at a time.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tipstream_core::{Amount, PayerId, Result, TipstreamError, TxHash, UnixSeconds};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics::EngineMetrics;
use crate::ports::{CheckpointSource, LifecycleTransactions};
use crate::projector::project;
use crate::scheduler::Generation;
use crate::types::{StreamCheckpoint, TxReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Inactive,
    Active(StreamCheckpoint),
}

impl StreamState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn checkpoint(&self) -> Option<&StreamCheckpoint> {
        match self {
            Self::Active(checkpoint) => Some(checkpoint),
            Self::Inactive => None,
        }
    }
}

impl From<StreamCheckpoint> for StreamState {
    fn from(checkpoint: StreamCheckpoint) -> Self {
        if checkpoint.active {
            Self::Active(checkpoint)
        } else {
            Self::Inactive
        }
    }
}

/// Parameters for opening a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub room_id: u64,
    pub rate_per_second: Amount,
    pub initial_balance: Amount,
}

impl StartRequest {
    pub fn validate(&self) -> Result<()> {
        if self.rate_per_second == 0 {
            return Err(TipstreamError::Validation("rate must be greater than zero".into()));
        }
        if self.initial_balance == 0 {
            return Err(TipstreamError::Validation(
                "initial balance must be greater than zero".into(),
            ));
        }
        if self.rate_per_second > self.initial_balance {
            return Err(TipstreamError::Validation(
                "initial balance must cover at least one second at the given rate".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub receipt: TxReceipt,
    pub checkpoint: StreamCheckpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopUpOutcome {
    pub receipt: TxReceipt,
    /// Post-confirmation authoritative checkpoint; `None` when that read
    /// failed and the next scheduled refresh has to pick it up
    pub checkpoint: Option<StreamCheckpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub receipt: TxReceipt,
    /// From the settlement event; the only value used for accounting
    pub settled_amount: Option<Amount>,
    /// Local estimate at confirmation time, display only
    pub projected_consumed: Amount,
}

/// Clears the in-flight flag when the operation ends, however it ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct StreamLifecycleController {
    payer: PayerId,
    transactions: Arc<dyn LifecycleTransactions>,
    checkpoints: Arc<dyn CheckpointSource>,
    state: watch::Sender<StreamState>,
    in_flight: AtomicBool,
    generation: Generation,
    metrics: Arc<EngineMetrics>,
}

impl StreamLifecycleController {
    pub fn new(
        payer: PayerId,
        transactions: Arc<dyn LifecycleTransactions>,
        checkpoints: Arc<dyn CheckpointSource>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(StreamState::Inactive);
        Self {
            payer,
            transactions,
            checkpoints,
            state,
            in_flight: AtomicBool::new(false),
            generation: Generation::new(),
            metrics,
        }
    }

    pub fn payer(&self) -> &PayerId {
        &self.payer
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome> {
        request.validate()?;
        let _guard = self.begin()?;
        if self.state().is_active() {
            return Err(TipstreamError::StreamAlreadyActive(self.payer.to_string()));
        }

        let receipt = self
            .execute(
                "start",
                self.transactions.submit_start(
                    &self.payer,
                    request.room_id,
                    request.rate_per_second,
                    request.initial_balance,
                ),
            )
            .await?;

        let checkpoint = StreamCheckpoint {
            room_id: request.room_id,
            rate_per_second: request.rate_per_second,
            start_time: receipt.confirmed_at,
            balance_at_checkpoint: request.initial_balance,
            active: true,
        };
        self.commit(StreamState::Active(checkpoint));

        info!(
            payer = %self.payer,
            room_id = request.room_id,
            rate_per_second = %request.rate_per_second,
            tx_hash = %receipt.tx_hash,
            "Stream started"
        );
        Ok(StartOutcome { receipt, checkpoint })
    }

    pub async fn top_up(&self, amount: Amount) -> Result<TopUpOutcome> {
        if amount == 0 {
            return Err(TipstreamError::Validation("top-up amount must be greater than zero".into()));
        }
        let _guard = self.begin()?;
        self.require_active()?;

        let receipt = self
            .execute("top_up", self.transactions.submit_top_up(&self.payer, amount))
            .await?;

        // The new balance comes from the ledger, never from local arithmetic
        let checkpoint = match self.checkpoints.read_stream_checkpoint(&self.payer).await {
            Ok(fresh) => {
                self.commit(StreamState::from(fresh));
                Some(fresh)
            }
            Err(e) => {
                self.metrics.checkpoint_refresh_failures.inc();
                warn!(
                    payer = %self.payer,
                    error = %e,
                    "Top-up confirmed but checkpoint read failed, awaiting next refresh"
                );
                None
            }
        };

        info!(payer = %self.payer, amount = %amount, tx_hash = %receipt.tx_hash, "Stream topped up");
        Ok(TopUpOutcome { receipt, checkpoint })
    }

    pub async fn stop(&self) -> Result<StopOutcome> {
        let _guard = self.begin()?;
        let checkpoint = self.require_active()?;

        let receipt = self
            .execute("stop", self.transactions.submit_stop(&self.payer))
            .await?;

        let projected_consumed = project(&checkpoint, receipt.confirmed_at).consumed;
        self.commit(StreamState::Inactive);

        match receipt.settled_amount {
            Some(settled) if settled != projected_consumed => debug!(
                payer = %self.payer,
                settled = %settled,
                projected = %projected_consumed,
                "Settlement differs from local projection"
            ),
            None => warn!(payer = %self.payer, "Stop confirmed without a settlement amount"),
            _ => {}
        }

        info!(payer = %self.payer, tx_hash = %receipt.tx_hash, "Stream stopped");
        Ok(StopOutcome {
            settled_amount: receipt.settled_amount,
            projected_consumed,
            receipt,
        })
    }

    /// Replace the state with the ledger's current checkpoint. A response
    /// that raced with a committed transition or an in-flight operation is
    /// discarded.
    pub async fn refresh(&self) -> Result<StreamState> {
        let ticket = self.generation.ticket();
        let checkpoint = match self.checkpoints.read_stream_checkpoint(&self.payer).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                self.metrics.checkpoint_refresh_failures.inc();
                return Err(e);
            }
        };

        if !self.generation.is_current(ticket) || self.is_busy() {
            self.metrics.stale_responses_discarded.inc();
            debug!(payer = %self.payer, "Discarding stale checkpoint read");
            return Ok(self.state());
        }

        let next = StreamState::from(checkpoint);
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        Ok(next)
    }

    /// Deactivate locally once the projection shows the balance is gone
    pub fn mark_exhausted(&self, now: UnixSeconds) -> bool {
        let exhausted = match self.state() {
            StreamState::Active(checkpoint) => project(&checkpoint, now).is_exhausted(),
            StreamState::Inactive => false,
        };
        if exhausted && !self.is_busy() {
            info!(payer = %self.payer, "Stream balance exhausted");
            self.commit(StreamState::Inactive);
            return true;
        }
        false
    }

    /// Invalidate outstanding reads, e.g. when the owning view goes away
    pub fn invalidate_pending_reads(&self) {
        self.generation.bump();
    }

    fn begin(&self) -> Result<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TipstreamError::OperationInFlight(self.payer.to_string()))?;
        Ok(InFlightGuard(&self.in_flight))
    }

    fn require_active(&self) -> Result<StreamCheckpoint> {
        match self.state() {
            StreamState::Active(checkpoint) => Ok(checkpoint),
            StreamState::Inactive => Err(TipstreamError::NoActiveStream(self.payer.to_string())),
        }
    }

    async fn execute(
        &self,
        operation: &'static str,
        submission: impl Future<Output = Result<TxHash>>,
    ) -> Result<TxReceipt> {
        let outcome = async {
            let tx_hash = submission.await?;
            let receipt = self.transactions.wait_for_receipt(&tx_hash).await?;
            if !receipt.success {
                return Err(TipstreamError::Transaction(format!(
                    "{} transaction {} reverted",
                    operation, tx_hash
                )));
            }
            Ok(receipt)
        }
        .await;

        match &outcome {
            Ok(_) => self.metrics.lifecycle_confirmed.inc(),
            Err(e) => {
                self.metrics.lifecycle_failed.inc();
                warn!(payer = %self.payer, operation, error = %e, "Stream operation failed");
            }
        }
        outcome
    }

    fn commit(&self, next: StreamState) {
        self.generation.bump();
        self.state.send_replace(next);
    }
}

/// One controller per payer; payers never contend with each other
pub struct LifecycleRegistry {
    controllers: DashMap<PayerId, Arc<StreamLifecycleController>>,
    transactions: Arc<dyn LifecycleTransactions>,
    checkpoints: Arc<dyn CheckpointSource>,
    metrics: Arc<EngineMetrics>,
}

impl LifecycleRegistry {
    pub fn new(
        transactions: Arc<dyn LifecycleTransactions>,
        checkpoints: Arc<dyn CheckpointSource>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            controllers: DashMap::new(),
            transactions,
            checkpoints,
            metrics,
        }
    }

    pub fn controller(&self, payer: &PayerId) -> Arc<StreamLifecycleController> {
        self.controllers
            .entry(payer.clone())
            .or_insert_with(|| {
                Arc::new(StreamLifecycleController::new(
                    payer.clone(),
                    self.transactions.clone(),
                    self.checkpoints.clone(),
                    self.metrics.clone(),
                ))
            })
            .clone()
    }

    pub fn active_streams(&self) -> Vec<(PayerId, StreamCheckpoint)> {
        self.controllers
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .state()
                    .checkpoint()
                    .map(|checkpoint| (entry.key().clone(), *checkpoint))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
