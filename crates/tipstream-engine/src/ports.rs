//! Boundary contracts for the ledger, transaction and event collaborators
//!
//! The engine never talks to a chain directly. Adapters implement these
//! traits; `crate::simulated::SimulatedLedger` implements all of them in
//! memory.

use async_trait::async_trait;
use tipstream_core::{Amount, PayerId, Result, TxHash};

use crate::types::{
    ContractStats, HistoricalTip, LowBalanceReading, StreamCheckpoint, TxReceipt, VolumeSnapshot,
};

/// Authoritative stream state reads
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    /// Returns an inactive checkpoint when the payer has no stream
    async fn read_stream_checkpoint(&self, payer: &PayerId) -> Result<StreamCheckpoint>;
}

/// Ledger's own low-balance verdict
#[async_trait]
pub trait LowBalanceSource: Send + Sync {
    async fn read_low_balance(&self, payer: &PayerId) -> Result<LowBalanceReading>;
}

/// Receipt lookup shared by every transaction-submitting port
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    /// Resolves once the transaction is included; `success == false` means reverted
    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<TxReceipt>;
}

/// Stream mutation transactions
#[async_trait]
pub trait LifecycleTransactions: ReceiptSource {
    async fn submit_start(
        &self,
        payer: &PayerId,
        room_id: u64,
        rate_per_second: Amount,
        initial_balance: Amount,
    ) -> Result<TxHash>;

    async fn submit_top_up(&self, payer: &PayerId, amount: Amount) -> Result<TxHash>;

    async fn submit_stop(&self, payer: &PayerId) -> Result<TxHash>;
}

/// One-off tip transactions
#[async_trait]
pub trait TipTransactions: ReceiptSource {
    async fn submit_tip(&self, payer: &PayerId, room_id: u64, amount: Amount) -> Result<TxHash>;

    /// `total` is split across `count` tips by the contract
    async fn submit_multiple_tips(
        &self,
        payer: &PayerId,
        room_id: u64,
        total: Amount,
        count: u32,
    ) -> Result<TxHash>;
}

/// Aggregate volume counters, polled when no per-event feed exists
#[async_trait]
pub trait VolumeSnapshotSource: Send + Sync {
    async fn read_volume_snapshot(&self) -> Result<VolumeSnapshot>;
}

/// Recent tips already recorded by the ledger
#[async_trait]
pub trait TipHistorySource: Send + Sync {
    async fn read_recent_tips(&self, room_id: Option<u64>, limit: usize)
        -> Result<Vec<HistoricalTip>>;
}

#[async_trait]
pub trait ContractStatsSource: Send + Sync {
    async fn read_contract_stats(&self) -> Result<ContractStats>;
}
