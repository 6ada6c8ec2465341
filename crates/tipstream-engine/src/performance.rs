//! Transaction performance tracking
//!
//! Owned by whoever submits transactions and passed in explicitly; there is
//! no process-wide tracker.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tipstream_core::{Chain, TxHash};
use tipstream_telemetry::Histogram;
use tokio::time::Instant;
use uuid::Uuid;

use crate::types::TxReceipt;

const DEFAULT_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxPerformance {
    pub id: Uuid,
    pub chain: Chain,
    pub tx_hash: Option<TxHash>,
    pub started_at: DateTime<Utc>,
    pub confirmation_ms: Option<u64>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub status: TxStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChainComparison {
    pub monad_avg_ms: Option<f64>,
    pub sepolia_avg_ms: Option<f64>,
    /// How many times faster Monad confirms than Sepolia
    pub speedup: Option<f64>,
}

pub struct PerformanceTracker {
    records: Mutex<VecDeque<TxPerformance>>,
    started: Mutex<HashMap<Uuid, Instant>>,
    latencies: DashMap<Chain, Histogram>,
    max_records: usize,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    pub fn with_history(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            started: Mutex::new(HashMap::new()),
            latencies: DashMap::new(),
            max_records: max_records.max(1),
        }
    }

    /// Open a pending record; the returned id closes it later
    pub fn begin(&self, chain: Chain) -> Uuid {
        let id = Uuid::new_v4();
        self.started.lock().insert(id, Instant::now());

        let mut records = self.records.lock();
        if records.len() >= self.max_records {
            if let Some(evicted) = records.pop_front() {
                self.started.lock().remove(&evicted.id);
            }
        }
        records.push_back(TxPerformance {
            id,
            chain,
            tx_hash: None,
            started_at: Utc::now(),
            confirmation_ms: None,
            block_number: None,
            gas_used: None,
            status: TxStatus::Pending,
            error: None,
        });
        id
    }

    /// Close a record from its receipt. Returns the measured latency.
    pub fn complete(&self, id: Uuid, receipt: &TxReceipt) -> Option<u64> {
        let elapsed_ms = self
            .started
            .lock()
            .remove(&id)
            .map(|started| started.elapsed().as_millis() as u64);

        let mut records = self.records.lock();
        let record = records.iter_mut().find(|r| r.id == id)?;
        record.tx_hash = Some(receipt.tx_hash.clone());
        record.block_number = Some(receipt.block_number);
        record.gas_used = Some(receipt.gas_used);
        record.confirmation_ms = elapsed_ms;

        if receipt.success {
            record.status = TxStatus::Confirmed;
            if let Some(ms) = elapsed_ms {
                self.latencies
                    .entry(record.chain)
                    .or_insert_with(|| Histogram::with_max_samples(record.chain.name(), self.max_records))
                    .record(ms as f64);
            }
        } else {
            record.status = TxStatus::Failed;
            record.error = Some("transaction reverted".to_string());
        }
        elapsed_ms
    }

    pub fn fail(&self, id: Uuid, error: impl Into<String>) {
        self.started.lock().remove(&id);
        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.status = TxStatus::Failed;
            record.error = Some(error.into());
        }
    }

    /// Mean confirmation latency over confirmed transactions on `chain`
    pub fn average_confirmation_ms(&self, chain: Chain) -> Option<f64> {
        self.latencies
            .get(&chain)
            .filter(|histogram| histogram.count() > 0)
            .map(|histogram| histogram.mean())
    }

    pub fn p95_confirmation_ms(&self, chain: Chain) -> Option<f64> {
        self.latencies
            .get(&chain)
            .filter(|histogram| histogram.count() > 0)
            .map(|histogram| histogram.percentile(95.0))
    }

    /// Newest first
    pub fn recent(&self, n: usize) -> Vec<TxPerformance> {
        self.records.lock().iter().rev().take(n).cloned().collect()
    }

    pub fn comparison(&self) -> ChainComparison {
        let monad_avg_ms = self.average_confirmation_ms(Chain::MonadTestnet);
        let sepolia_avg_ms = self.average_confirmation_ms(Chain::EthereumSepolia);
        let speedup = match (monad_avg_ms, sepolia_avg_ms) {
            (Some(monad), Some(sepolia)) if monad > 0.0 => Some(sepolia / monad),
            _ => None,
        };
        ChainComparison {
            monad_avg_ms,
            sepolia_avg_ms,
            speedup,
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
