//! Tipstream Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Payment primitives (amounts, payers, tip modes, chains)
//! - Error taxonomy shared by the engine and its adapters
//! - Environment-driven engine configuration
//! - Service runtime with graceful shutdown

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::EngineConfig;
pub use domain::*;
pub use error::{Result, TipstreamError};
pub use service::{HealthStatus, ServiceRuntime, TipstreamService};
