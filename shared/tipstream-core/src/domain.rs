//! Core domain types shared by the engine and its adapters

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TipstreamError};

/// Smallest-unit currency amount (wei-style, 18 decimals)
pub type Amount = u128;

/// Unix timestamp in seconds
pub type UnixSeconds = u64;

/// Zero address used when the payer of a tip cannot be known
pub const UNKNOWN_PAYER: &str = "0x0000000000000000000000000000000000000000";

/// Wall clock as Unix seconds
pub fn unix_now() -> UnixSeconds {
    Utc::now().timestamp().max(0) as UnixSeconds
}

/// Payer identity (an account address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PayerId(String);

impl PayerId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().trim().to_ascii_lowercase())
    }

    /// Sentinel for tips synthesized without per-event data
    pub fn unknown() -> Self {
        Self(UNKNOWN_PAYER.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_PAYER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234ab...cdef01` style abbreviation
    pub fn short(&self) -> String {
        if self.0.len() <= 14 {
            return self.0.clone();
        }
        format!("{}...{}", &self.0[..8], &self.0[self.0.len() - 6..])
    }
}

impl From<String> for PayerId {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

impl From<&str> for PayerId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<PayerId> for String {
    fn from(payer: PayerId) -> Self {
        payer.0
    }
}

impl fmt::Display for PayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipMode {
    Instant,
    Stream,
}

impl TipMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for TipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction hash as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    MonadTestnet,
    EthereumSepolia,
}

impl Chain {
    pub fn from_id(id: u64) -> Result<Self> {
        match id {
            10143 => Ok(Self::MonadTestnet),
            11155111 => Ok(Self::EthereumSepolia),
            other => Err(TipstreamError::Config(format!("Unsupported chain id: {}", other))),
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::MonadTestnet => 10143,
            Self::EthereumSepolia => 11155111,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MonadTestnet => "Monad Testnet",
            Self::EthereumSepolia => "Ethereum Sepolia",
        }
    }

    /// Native currency symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::MonadTestnet => "MON",
            Self::EthereumSepolia => "ETH",
        }
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::MonadTestnet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payer_normalization() {
        let a = PayerId::new("0xABCdef0000000000000000000000000000000001");
        let b = PayerId::from("0xabcdef0000000000000000000000000000000001");
        assert_eq!(a, b);
        assert!(!a.is_unknown());
        assert_eq!(a.short(), "0xabcdef...000001");
    }

    #[test]
    fn test_unknown_payer() {
        assert!(PayerId::unknown().is_unknown());
        assert!(PayerId::new(UNKNOWN_PAYER).is_unknown());
    }

    #[test]
    fn test_payer_serde_normalizes() {
        let payer: PayerId = serde_json::from_str("\"0xAA\"").unwrap();
        assert_eq!(payer.as_str(), "0xaa");
        assert_eq!(serde_json::to_string(&payer).unwrap(), "\"0xaa\"");
    }

    #[test]
    fn test_chain_lookup() {
        assert_eq!(Chain::from_id(10143).unwrap(), Chain::MonadTestnet);
        assert_eq!(Chain::from_id(11155111).unwrap().symbol(), "ETH");
        assert!(matches!(Chain::from_id(1), Err(TipstreamError::Config(_))));
    }

    #[test]
    fn test_tip_mode_serde() {
        assert_eq!(serde_json::to_string(&TipMode::Stream).unwrap(), "\"stream\"");
        let mode: TipMode = serde_json::from_str("\"instant\"").unwrap();
        assert_eq!(mode, TipMode::Instant);
    }
}
