//! Payment stream and tip event data model

use serde::{Deserialize, Serialize};
use tipstream_core::{Amount, PayerId, Result, TipMode, TipstreamError, TxHash, UnixSeconds};

/// Last authoritative on-chain state of one payer's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamCheckpoint {
    pub room_id: u64,
    /// Smallest currency unit per second
    pub rate_per_second: Amount,
    pub start_time: UnixSeconds,
    pub balance_at_checkpoint: Amount,
    pub active: bool,
}

impl StreamCheckpoint {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn rate_per_hour(&self) -> Amount {
        self.rate_per_second.saturating_mul(3600)
    }
}

/// Locally derived view of a stream at some instant; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectedState {
    pub elapsed: u64,
    pub consumed: Amount,
    pub remaining_balance: Amount,
    pub remaining_time: u64,
}

impl ProjectedState {
    pub fn is_exhausted(&self) -> bool {
        self.remaining_balance == 0
    }

    /// Remaining balance as a whole percentage of `initial`
    pub fn remaining_percent(&self, initial: Amount) -> u8 {
        if initial == 0 {
            return 0;
        }
        let pct = self.remaining_balance.min(initial).saturating_mul(100) / initial;
        pct as u8
    }
}

/// Low-balance verdict, either read from the ledger or derived locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LowBalanceReading {
    pub is_low: bool,
    pub remaining_time: u64,
}

/// A raw payment notification as delivered by a producer.
///
/// Amount and timestamp stay textual until ingestion so that a single bad
/// item can be dropped without failing its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub payer: Option<String>,
    pub amount: String,
    pub timestamp: String,
    pub source_id: String,
    #[serde(default)]
    pub block_number: Option<u64>,
    pub mode: TipMode,
    #[serde(default)]
    pub room_id: Option<u64>,
}

impl RawEvent {
    pub fn new(
        payer: Option<&PayerId>,
        amount: Amount,
        timestamp: UnixSeconds,
        source_id: impl Into<String>,
        mode: TipMode,
    ) -> Self {
        Self {
            payer: payer.map(|p| p.as_str().to_string()),
            amount: amount.to_string(),
            timestamp: timestamp.to_string(),
            source_id: source_id.into(),
            block_number: None,
            mode,
            room_id: None,
        }
    }

    pub fn with_room(mut self, room_id: u64) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn with_block(mut self, block_number: u64) -> Self {
        self.block_number = Some(block_number);
        self
    }
}

/// Immutable record of one accepted payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipEvent {
    pub payer: PayerId,
    pub amount: Amount,
    pub timestamp: UnixSeconds,
    pub source_id: String,
    pub block_number: u64,
    pub mode: TipMode,
    pub room_id: Option<u64>,
}

/// Identity used to recognise the same payment delivered twice
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub source_id: String,
    pub amount: Amount,
    pub mode: TipMode,
}

impl TipEvent {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            source_id: self.source_id.clone(),
            amount: self.amount,
            mode: self.mode,
        }
    }
}

impl TryFrom<&RawEvent> for TipEvent {
    type Error = TipstreamError;

    fn try_from(raw: &RawEvent) -> Result<Self> {
        if raw.source_id.trim().is_empty() {
            return Err(TipstreamError::Decode("missing source id".into()));
        }
        let amount = parse_amount(&raw.amount)?;
        let timestamp = raw
            .timestamp
            .trim()
            .parse::<UnixSeconds>()
            .map_err(|e| TipstreamError::Decode(format!("timestamp {:?}: {}", raw.timestamp, e)))?;
        let payer = match raw.payer.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => PayerId::new(address),
            _ => PayerId::unknown(),
        };

        Ok(Self {
            payer,
            amount,
            timestamp,
            source_id: raw.source_id.clone(),
            block_number: raw.block_number.unwrap_or(0),
            mode: raw.mode,
            room_id: raw.room_id,
        })
    }
}

/// Parse a decimal or `0x`-prefixed hex amount
pub fn parse_amount(raw: &str) -> Result<Amount> {
    let trimmed = raw.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => Amount::from_str_radix(hex, 16),
        None => trimmed.parse::<Amount>(),
    };
    parsed.map_err(|e| TipstreamError::Decode(format!("amount {:?}: {}", raw, e)))
}

/// Per-payer aggregate over the considered event window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerSummary {
    pub payer: PayerId,
    pub total_amount: Amount,
    pub tip_count: u64,
    pub last_tip_time: UnixSeconds,
}

/// Confirmation of an externally executed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub confirmed_at: UnixSeconds,
    pub success: bool,
    pub gas_used: u64,
    /// Amount paid out by a stop, taken from the settlement event
    pub settled_amount: Option<Amount>,
}

/// Aggregate volume counters read from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub instant_volume_total: Amount,
    pub stream_volume_total: Amount,
    pub observed_at: UnixSeconds,
}

/// One entry of the ledger's recent-tips history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalTip {
    /// Position in the ledger's tip log, stable across reads
    #[serde(default)]
    pub index: u64,
    pub room_id: u64,
    pub tipper: String,
    pub amount: Amount,
    pub timestamp: UnixSeconds,
}

/// Contract-wide totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractStats {
    pub total_rooms: u64,
    pub total_tips: u64,
    pub total_volume: Amount,
}
