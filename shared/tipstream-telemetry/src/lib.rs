//! Tipstream Telemetry
//!
//! Structured logging setup and lightweight in-process metrics.

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{Counter, Gauge, Histogram};
pub use tracing_setup::{build_filter, init_tracing};

/// Initialize logging for a service at its configured level
pub fn init(service_name: &str, log_level: &str) -> Result<(), TelemetryError> {
    init_tracing(&TelemetryConfig::for_service(service_name, log_level))
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),

    #[error("Invalid log filter {0}")]
    InvalidFilter(String),
}
