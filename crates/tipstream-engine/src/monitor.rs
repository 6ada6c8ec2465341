//! Low-Balance Monitor
//!
//! Re-derives the low-balance condition locally between authoritative reads,
//! and performs the authoritative re-check on its own (slower) interval.
//! An unreachable ledger never produces a fresh `is_low = true`: the last
//! known status is handed back marked stale, together with the error.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tipstream_core::{PayerId, TipstreamError, UnixSeconds};
use tracing::{debug, warn};

use crate::metrics::EngineMetrics;
use crate::ports::LowBalanceSource;
use crate::projector::project;
use crate::types::{LowBalanceReading, StreamCheckpoint};

/// Client-side low-balance derivation
pub fn evaluate(checkpoint: &StreamCheckpoint, now: UnixSeconds, horizon: u64) -> LowBalanceReading {
    if !checkpoint.active {
        return LowBalanceReading::default();
    }
    let projected = project(checkpoint, now);
    LowBalanceReading {
        is_low: projected.remaining_time <= horizon,
        remaining_time: projected.remaining_time,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingOrigin {
    Authoritative,
    Projected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowBalanceStatus {
    pub reading: LowBalanceReading,
    pub origin: ReadingOrigin,
    pub checked_at: UnixSeconds,
    pub stale: bool,
}

/// Authoritative read failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleReading {
    /// Last successful status, re-flagged as stale
    pub last_known: Option<LowBalanceStatus>,
    pub error: TipstreamError,
}

pub struct LowBalanceMonitor {
    payer: PayerId,
    horizon: u64,
    source: Arc<dyn LowBalanceSource>,
    last: Mutex<Option<LowBalanceStatus>>,
    metrics: Arc<EngineMetrics>,
}

impl LowBalanceMonitor {
    pub fn new(
        payer: PayerId,
        horizon: u64,
        source: Arc<dyn LowBalanceSource>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            payer,
            horizon,
            source,
            last: Mutex::new(None),
            metrics,
        }
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    pub fn last_known(&self) -> Option<LowBalanceStatus> {
        *self.last.lock()
    }

    /// Cheap local verdict for the display cadence
    pub fn evaluate_local(&self, checkpoint: &StreamCheckpoint, now: UnixSeconds) -> LowBalanceStatus {
        LowBalanceStatus {
            reading: evaluate(checkpoint, now, self.horizon),
            origin: ReadingOrigin::Projected,
            checked_at: now,
            stale: false,
        }
    }

    /// Authoritative re-check. Inactive streams are never low and need no read.
    pub async fn check(
        &self,
        checkpoint: &StreamCheckpoint,
        now: UnixSeconds,
    ) -> Result<LowBalanceStatus, StaleReading> {
        if !checkpoint.active {
            let status = LowBalanceStatus {
                reading: LowBalanceReading::default(),
                origin: ReadingOrigin::Projected,
                checked_at: now,
                stale: false,
            };
            *self.last.lock() = Some(status);
            return Ok(status);
        }

        match self.source.read_low_balance(&self.payer).await {
            Ok(reading) => {
                let status = LowBalanceStatus {
                    reading,
                    origin: ReadingOrigin::Authoritative,
                    checked_at: now,
                    stale: false,
                };
                *self.last.lock() = Some(status);
                debug!(
                    payer = %self.payer,
                    is_low = reading.is_low,
                    remaining_time = reading.remaining_time,
                    "Low-balance check complete"
                );
                Ok(status)
            }
            Err(error) => {
                self.metrics.stale_low_balance_readings.inc();
                warn!(payer = %self.payer, error = %error, "Low-balance check failed, keeping last known status");
                let last_known = self.last.lock().map(|status| LowBalanceStatus {
                    stale: true,
                    ..status
                });
                Err(StaleReading { last_known, error })
            }
        }
    }
}
