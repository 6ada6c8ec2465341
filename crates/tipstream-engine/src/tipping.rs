//! Instant tip submission

use serde::Serialize;
use std::sync::Arc;
use tipstream_core::{Amount, Chain, PayerId, Result, TipstreamError, TxHash};
use tracing::{info, warn};

use crate::performance::PerformanceTracker;
use crate::ports::TipTransactions;
use crate::types::TxReceipt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TipOutcome {
    pub receipt: TxReceipt,
    pub confirmation_ms: Option<u64>,
}

pub struct TipSubmitter {
    chain: Chain,
    transactions: Arc<dyn TipTransactions>,
    tracker: Arc<PerformanceTracker>,
}

impl TipSubmitter {
    pub fn new(
        chain: Chain,
        transactions: Arc<dyn TipTransactions>,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            chain,
            transactions,
            tracker,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub async fn send_tip(&self, payer: &PayerId, room_id: u64, amount: Amount) -> Result<TipOutcome> {
        if amount == 0 {
            return Err(TipstreamError::Validation("tip amount must be greater than zero".into()));
        }

        let outcome = self
            .submit(self.transactions.submit_tip(payer, room_id, amount))
            .await?;
        info!(
            payer = %payer,
            room_id,
            amount = %amount,
            tx_hash = %outcome.receipt.tx_hash,
            confirmation_ms = ?outcome.confirmation_ms,
            "Tip confirmed"
        );
        Ok(outcome)
    }

    /// One transaction carrying `count` tips that split `total`
    pub async fn send_multiple_tips(
        &self,
        payer: &PayerId,
        room_id: u64,
        total: Amount,
        count: u32,
    ) -> Result<TipOutcome> {
        if count == 0 {
            return Err(TipstreamError::Validation("tip count must be greater than zero".into()));
        }
        if total < Amount::from(count) {
            return Err(TipstreamError::Validation(
                "total must cover at least one unit per tip".into(),
            ));
        }

        let outcome = self
            .submit(
                self.transactions
                    .submit_multiple_tips(payer, room_id, total, count),
            )
            .await?;
        info!(
            payer = %payer,
            room_id,
            total = %total,
            count,
            tx_hash = %outcome.receipt.tx_hash,
            "Batch tip confirmed"
        );
        Ok(outcome)
    }

    async fn submit(
        &self,
        submission: impl std::future::Future<Output = Result<TxHash>>,
    ) -> Result<TipOutcome> {
        let id = self.tracker.begin(self.chain);

        let tx_hash = match submission.await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                self.tracker.fail(id, e.to_string());
                warn!(chain = self.chain.name(), error = %e, "Tip submission failed");
                return Err(e);
            }
        };

        let receipt = match self.transactions.wait_for_receipt(&tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.tracker.fail(id, e.to_string());
                warn!(tx_hash = %tx_hash, error = %e, "Tip confirmation failed");
                return Err(e);
            }
        };

        let confirmation_ms = self.tracker.complete(id, &receipt);
        if !receipt.success {
            return Err(TipstreamError::Transaction(format!(
                "tip transaction {} reverted",
                tx_hash
            )));
        }
        Ok(TipOutcome {
            receipt,
            confirmation_ms,
        })
    }
}
