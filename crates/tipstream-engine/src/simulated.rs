//! In-memory ledger
//!
//! Implements every port with the same rules the tipping contract applies,
//! so the engine can run without a chain (demo mode, tests). Time is the
//! wall clock unless pinned with `set_time`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tipstream_core::{unix_now, Amount, PayerId, Result, TipMode, TipstreamError, TxHash, UnixSeconds};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ingest::LedgerEventStream;
use crate::monitor::evaluate;
use crate::ports::{
    CheckpointSource, ContractStatsSource, LifecycleTransactions, LowBalanceSource, ReceiptSource,
    TipHistorySource, TipTransactions, VolumeSnapshotSource,
};
use crate::projector::project;
use crate::types::{
    ContractStats, HistoricalTip, LowBalanceReading, RawEvent, StreamCheckpoint, TxReceipt,
    VolumeSnapshot,
};

/// Contract-side low-balance window
pub const CONTRACT_LOW_BALANCE_SECS: u64 = 300;

const BASE_GAS: u64 = 21_000;

#[derive(Debug, Clone, Copy)]
struct LedgerStream {
    checkpoint: StreamCheckpoint,
    /// Consumed in earlier segments, before the latest re-checkpoint
    settled_before: Amount,
}

#[derive(Debug, Default)]
struct LedgerState {
    clock: Option<UnixSeconds>,
    block_number: u64,
    submitted: u64,
    revert_next: bool,
    streams: HashMap<PayerId, LedgerStream>,
    receipts: HashMap<TxHash, TxReceipt>,
    tips: Vec<HistoricalTip>,
    rooms: HashSet<u64>,
    instant_volume: Amount,
    stream_volume: Amount,
}

impl LedgerState {
    fn now(&self) -> UnixSeconds {
        self.clock.unwrap_or_else(unix_now)
    }
}

pub struct SimulatedLedger {
    state: Mutex<LedgerState>,
    offline: AtomicBool,
    events: Mutex<Option<mpsc::Sender<RawEvent>>>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            offline: AtomicBool::new(false),
            events: Mutex::new(None),
        }
    }

    /// Pin the ledger clock
    pub fn set_time(&self, now: UnixSeconds) {
        self.state.lock().clock = Some(now);
    }

    pub fn advance(&self, secs: u64) {
        let mut state = self.state.lock();
        let now = state.now();
        state.clock = Some(now.saturating_add(secs));
    }

    pub fn now(&self) -> UnixSeconds {
        self.state.lock().now()
    }

    /// Every read and submission fails with a connectivity error while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next submitted transaction is mined but reverts
    pub fn revert_next_transaction(&self) {
        self.state.lock().revert_next = true;
    }

    pub fn submitted_transactions(&self) -> u64 {
        self.state.lock().submitted
    }

    /// Install a stream as if it had been started earlier
    pub fn seed_stream(&self, payer: &PayerId, checkpoint: StreamCheckpoint) {
        let mut state = self.state.lock();
        state.rooms.insert(checkpoint.room_id);
        state.streams.insert(
            payer.clone(),
            LedgerStream {
                checkpoint,
                settled_before: 0,
            },
        );
    }

    /// Push a tip recorded elsewhere into the ledger history. The ledger
    /// assigns the index.
    pub fn seed_tip(&self, tip: HistoricalTip) {
        let mut state = self.state.lock();
        state.rooms.insert(tip.room_id);
        state.instant_volume = state.instant_volume.saturating_add(tip.amount);
        let index = state.tips.len() as u64;
        state.tips.push(HistoricalTip { index, ..tip });
    }

    /// Discrete event feed of confirmed tips and stream settlements
    pub fn subscribe_events(&self, buffer: usize) -> LedgerEventStream {
        let (tx, stream) = LedgerEventStream::channel(buffer);
        *self.events.lock() = Some(tx);
        stream
    }

    pub fn contract_stats(&self) -> ContractStats {
        let state = self.state.lock();
        ContractStats {
            total_rooms: state.rooms.len() as u64,
            total_tips: state.tips.len() as u64,
            total_volume: state.instant_volume.saturating_add(state.stream_volume),
        }
    }

    pub fn volume_snapshot(&self) -> VolumeSnapshot {
        let state = self.state.lock();
        VolumeSnapshot {
            instant_volume_total: state.instant_volume,
            stream_volume_total: state.stream_volume,
            observed_at: state.now(),
        }
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TipstreamError::Connectivity("ledger RPC unreachable".into()));
        }
        Ok(())
    }

    /// Mine one transaction. `apply` returns `None` when the contract
    /// would revert, or the settlement amount (if any) on success.
    fn transact<F>(&self, label: &str, apply: F) -> Result<TxHash>
    where
        F: FnOnce(&mut LedgerState, UnixSeconds) -> Option<Option<Amount>>,
    {
        let mut state = self.state.lock();
        state.submitted += 1;
        drop(state);
        self.ensure_online()?;

        let mut state = self.state.lock();
        state.block_number += 1;
        let now = state.now();
        let tx_hash = TxHash(format!("0x{:064x}", state.submitted));

        let outcome = if std::mem::take(&mut state.revert_next) {
            None
        } else {
            apply(&mut state, now)
        };

        let receipt = TxReceipt {
            tx_hash: tx_hash.clone(),
            block_number: state.block_number,
            confirmed_at: now,
            success: outcome.is_some(),
            gas_used: BASE_GAS,
            settled_amount: outcome.flatten(),
        };
        state.receipts.insert(tx_hash.clone(), receipt);
        debug!(label, tx_hash = %tx_hash, success = outcome.is_some(), "Simulated transaction mined");
        Ok(tx_hash)
    }

    fn emit(&self, event: RawEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            if let Err(e) = tx.try_send(event) {
                warn!(error = %e, "Simulated event feed is full, dropping event");
            }
        }
    }

    fn record_tip(state: &mut LedgerState, payer: &PayerId, room_id: u64, amount: Amount, now: UnixSeconds) {
        state.rooms.insert(room_id);
        state.instant_volume = state.instant_volume.saturating_add(amount);
        let index = state.tips.len() as u64;
        state.tips.push(HistoricalTip {
            index,
            room_id,
            tipper: payer.to_string(),
            amount,
            timestamp: now,
        });
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSource for SimulatedLedger {
    async fn read_stream_checkpoint(&self, payer: &PayerId) -> Result<StreamCheckpoint> {
        self.ensure_online()?;
        Ok(self
            .state
            .lock()
            .streams
            .get(payer)
            .map(|stream| stream.checkpoint)
            .unwrap_or_default())
    }
}

#[async_trait]
impl LowBalanceSource for SimulatedLedger {
    async fn read_low_balance(&self, payer: &PayerId) -> Result<LowBalanceReading> {
        self.ensure_online()?;
        let state = self.state.lock();
        Ok(match state.streams.get(payer) {
            Some(stream) => evaluate(&stream.checkpoint, state.now(), CONTRACT_LOW_BALANCE_SECS),
            None => LowBalanceReading::default(),
        })
    }
}

#[async_trait]
impl ReceiptSource for SimulatedLedger {
    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<TxReceipt> {
        self.ensure_online()?;
        self.state
            .lock()
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| TipstreamError::Transaction(format!("unknown transaction {}", tx_hash)))
    }
}

#[async_trait]
impl LifecycleTransactions for SimulatedLedger {
    async fn submit_start(
        &self,
        payer: &PayerId,
        room_id: u64,
        rate_per_second: Amount,
        initial_balance: Amount,
    ) -> Result<TxHash> {
        self.transact("start", |state, now| {
            if state.streams.contains_key(payer) || rate_per_second == 0 || initial_balance == 0 {
                return None;
            }
            state.rooms.insert(room_id);
            state.streams.insert(
                payer.clone(),
                LedgerStream {
                    checkpoint: StreamCheckpoint {
                        room_id,
                        rate_per_second,
                        start_time: now,
                        balance_at_checkpoint: initial_balance,
                        active: true,
                    },
                    settled_before: 0,
                },
            );
            Some(None)
        })
    }

    async fn submit_top_up(&self, payer: &PayerId, amount: Amount) -> Result<TxHash> {
        self.transact("top_up", |state, now| {
            let stream = state.streams.get_mut(payer)?;
            let projected = project(&stream.checkpoint, now);
            stream.settled_before = stream.settled_before.saturating_add(projected.consumed);
            stream.checkpoint.start_time = now;
            stream.checkpoint.balance_at_checkpoint =
                projected.remaining_balance.saturating_add(amount);
            Some(None)
        })
    }

    async fn submit_stop(&self, payer: &PayerId) -> Result<TxHash> {
        let mut settlement = None;
        let tx_hash = self.transact("stop", |state, now| {
            let stream = state.streams.remove(payer)?;
            let consumed = project(&stream.checkpoint, now).consumed;
            let settled = stream.settled_before.saturating_add(consumed);
            state.stream_volume = state.stream_volume.saturating_add(settled);
            settlement = Some((stream.checkpoint.room_id, settled, now));
            Some(Some(settled))
        })?;

        if let Some((room_id, settled, now)) = settlement {
            self.emit(
                RawEvent::new(Some(payer), settled, now, tx_hash.as_str(), TipMode::Stream)
                    .with_room(room_id),
            );
        }
        Ok(tx_hash)
    }
}

#[async_trait]
impl TipTransactions for SimulatedLedger {
    async fn submit_tip(&self, payer: &PayerId, room_id: u64, amount: Amount) -> Result<TxHash> {
        let mut tipped_at = None;
        let tx_hash = self.transact("tip", |state, now| {
            if amount == 0 {
                return None;
            }
            Self::record_tip(state, payer, room_id, amount, now);
            tipped_at = Some(now);
            Some(None)
        })?;

        if let Some(now) = tipped_at {
            self.emit(
                RawEvent::new(Some(payer), amount, now, tx_hash.as_str(), TipMode::Instant)
                    .with_room(room_id),
            );
        }
        Ok(tx_hash)
    }

    async fn submit_multiple_tips(
        &self,
        payer: &PayerId,
        room_id: u64,
        total: Amount,
        count: u32,
    ) -> Result<TxHash> {
        let mut split = Vec::new();
        let tx_hash = self.transact("multi_tip", |state, now| {
            let count = Amount::from(count);
            if count == 0 || total < count {
                return None;
            }
            let each = total / count;
            for i in 0..count {
                let amount = if i + 1 == count {
                    total - each * (count - 1)
                } else {
                    each
                };
                Self::record_tip(state, payer, room_id, amount, now);
                split.push((amount, now));
            }
            Some(None)
        })?;

        for (index, (amount, now)) in split.into_iter().enumerate() {
            let source_id = format!("{}:{}", tx_hash, index);
            self.emit(
                RawEvent::new(Some(payer), amount, now, source_id, TipMode::Instant)
                    .with_room(room_id),
            );
        }
        Ok(tx_hash)
    }
}

#[async_trait]
impl VolumeSnapshotSource for SimulatedLedger {
    async fn read_volume_snapshot(&self) -> Result<VolumeSnapshot> {
        self.ensure_online()?;
        Ok(self.volume_snapshot())
    }
}

#[async_trait]
impl TipHistorySource for SimulatedLedger {
    async fn read_recent_tips(
        &self,
        room_id: Option<u64>,
        limit: usize,
    ) -> Result<Vec<HistoricalTip>> {
        self.ensure_online()?;
        let state = self.state.lock();
        if state.tips.is_empty() {
            return Err(TipstreamError::Decode("recent tips returned no data".into()));
        }
        let mut recent: Vec<HistoricalTip> = state
            .tips
            .iter()
            .rev()
            .filter(|tip| room_id.map_or(true, |room| tip.room_id == room))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }
}

#[async_trait]
impl ContractStatsSource for SimulatedLedger {
    async fn read_contract_stats(&self) -> Result<ContractStats> {
        self.ensure_online()?;
        Ok(self.contract_stats())
    }
}
