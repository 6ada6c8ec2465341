//! Error types for tipstream components

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TipstreamError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TipstreamError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No active stream for {0}")]
    NoActiveStream(String),

    #[error("Stream already active for {0}")]
    StreamAlreadyActive(String),

    #[error("Operation already in flight for {0}")]
    OperationInFlight(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TipstreamError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Connectivity(_) => "CONNECTIVITY_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NoActiveStream(_) => "NO_ACTIVE_STREAM",
            Self::StreamAlreadyActive(_) => "STREAM_ALREADY_ACTIVE",
            Self::OperationInFlight(_) => "OPERATION_IN_FLIGHT",
            Self::Transaction(_) => "TRANSACTION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Only connectivity failures are retried on the next scheduled tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Rejected before any external call was made.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NoActiveStream(_)
                | Self::StreamAlreadyActive(_)
                | Self::OperationInFlight(_)
        )
    }
}

impl From<std::io::Error> for TipstreamError {
    fn from(err: std::io::Error) -> Self {
        TipstreamError::Connectivity(err.to_string())
    }
}

impl From<serde_json::Error> for TipstreamError {
    fn from(err: serde_json::Error) -> Self {
        TipstreamError::Decode(err.to_string())
    }
}
