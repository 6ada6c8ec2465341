//! Demo wiring configuration

use std::env;
use std::str::FromStr;
use tipstream_core::{PayerId, Result, TipstreamError};

/// Where live feed events come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Discrete notifications for every confirmed tip and settlement
    Events,
    /// Diff of aggregate volume counters; payers are unknown
    Snapshot,
    /// Random tips, no ledger activity
    Mock,
}

impl FromStr for FeedMode {
    type Err = TipstreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "events" => Ok(Self::Events),
            "snapshot" => Ok(Self::Snapshot),
            "mock" => Ok(Self::Mock),
            other => Err(TipstreamError::Config(format!("Unknown FEED_MODE: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub feed_mode: FeedMode,
    pub viewer: PayerId,
    pub tippers: Vec<PayerId>,
    pub tip_interval_secs: u64,
    pub report_interval_secs: u64,
}

impl DemoConfig {
    pub fn from_env() -> Result<Self> {
        let feed_mode = env::var("FEED_MODE")
            .map(|raw| raw.parse())
            .unwrap_or(Ok(FeedMode::Events))?;
        let viewer = PayerId::new(
            env::var("VIEWER_ADDRESS")
                .unwrap_or_else(|_| "0x5a1e000000000000000000000000000000000001".to_string()),
        );

        Ok(Self {
            feed_mode,
            viewer,
            tippers: (1..=5u8)
                .map(|i| PayerId::new(format!("0x7199e7{:034x}", i)))
                .collect(),
            tip_interval_secs: parse_secs("DEMO_TIP_INTERVAL_SECS", 3)?,
            report_interval_secs: parse_secs("REPORT_INTERVAL_SECS", 10)?,
        })
    }
}

fn parse_secs(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(0) | Err(_) => Err(TipstreamError::Config(format!(
                "{} must be a positive number of seconds, got {:?}",
                name, raw
            ))),
            Ok(secs) => Ok(secs),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_mode_parsing() {
        assert_eq!("Events".parse::<FeedMode>().unwrap(), FeedMode::Events);
        assert_eq!(" snapshot ".parse::<FeedMode>().unwrap(), FeedMode::Snapshot);
        assert!("carrier-pigeon".parse::<FeedMode>().is_err());
    }

    #[test]
    fn test_parse_secs_default() {
        assert_eq!(parse_secs("TIP_DASHBOARD_TEST_UNSET_SECS", 7).unwrap(), 7);
    }
}
