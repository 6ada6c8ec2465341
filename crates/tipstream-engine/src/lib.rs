//! Tipstream Engine
//!
//! Off-chain accounting for rate-based payment streams and live tip
//! aggregation:
//! - Stream projection and low-balance detection between authoritative reads
//! - Per-payer stream lifecycle (start, top-up, stop) committed on confirmation
//! - Deduplicated, bounded live feed built from pluggable event producers
//! - Deterministic leaderboard ranking
//!
//! The chain itself sits behind the traits in [`ports`].

pub mod dashboard;
pub mod ingest;
pub mod leaderboard;
pub mod lifecycle;
pub mod metrics;
pub mod monitor;
pub mod performance;
pub mod ports;
pub mod projector;
pub mod scheduler;
pub mod simulated;
pub mod tipping;
pub mod types;

pub use dashboard::{DashboardEngine, DashboardWiring, StreamView};
pub use ingest::{EventIngester, IngestReport, RawEventSource};
pub use leaderboard::{rank, Leaderboard, LeaderboardAggregator, VolumeBreakdown};
pub use lifecycle::{LifecycleRegistry, StartRequest, StreamLifecycleController, StreamState};
pub use metrics::EngineMetrics;
pub use monitor::{evaluate, LowBalanceMonitor, LowBalanceStatus};
pub use performance::PerformanceTracker;
pub use projector::project;
pub use simulated::SimulatedLedger;
pub use tipping::TipSubmitter;
pub use types::*;
