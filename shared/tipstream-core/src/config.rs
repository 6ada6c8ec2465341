//! Configuration management for the dashboard engine

use crate::domain::Chain;
use crate::error::{Result, TipstreamError};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub service_name: String,
    pub chain_id: u64,
    pub room_id: Option<u64>,
    pub feed_capacity: usize,
    pub leaderboard_window: usize,
    pub leaderboard_size: usize,
    pub low_balance_horizon_secs: u64,
    pub checkpoint_refresh_secs: u64,
    pub projection_tick_secs: u64,
    pub low_balance_check_secs: u64,
    pub snapshot_poll_secs: u64,
    pub history_limit: usize,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "tip-dashboard".to_string(),
            chain_id: 10143,
            room_id: None,
            feed_capacity: 100,
            leaderboard_window: 50,
            leaderboard_size: 10,
            low_balance_horizon_secs: 300,
            checkpoint_refresh_secs: 5,
            projection_tick_secs: 1,
            low_balance_check_secs: 10,
            snapshot_poll_secs: 5,
            history_limit: 50,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            chain_id: parse_var("CHAIN_ID", defaults.chain_id)?,
            room_id: match env::var("ROOM_ID") {
                Ok(raw) if !raw.trim().is_empty() => Some(
                    raw.trim()
                        .parse()
                        .map_err(|e| TipstreamError::Config(format!("Invalid ROOM_ID: {}", e)))?,
                ),
                _ => None,
            },
            feed_capacity: parse_var("FEED_CAPACITY", defaults.feed_capacity)?,
            leaderboard_window: parse_var("LEADERBOARD_WINDOW", defaults.leaderboard_window)?,
            leaderboard_size: parse_var("LEADERBOARD_SIZE", defaults.leaderboard_size)?,
            low_balance_horizon_secs: parse_var(
                "LOW_BALANCE_HORIZON_SECS",
                defaults.low_balance_horizon_secs,
            )?,
            checkpoint_refresh_secs: parse_var(
                "CHECKPOINT_REFRESH_SECS",
                defaults.checkpoint_refresh_secs,
            )?,
            projection_tick_secs: parse_var("PROJECTION_TICK_SECS", defaults.projection_tick_secs)?,
            low_balance_check_secs: parse_var(
                "LOW_BALANCE_CHECK_SECS",
                defaults.low_balance_check_secs,
            )?,
            snapshot_poll_secs: parse_var("SNAPSHOT_POLL_SECS", defaults.snapshot_poll_secs)?,
            history_limit: parse_var("HISTORY_LIMIT", defaults.history_limit)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Chain::from_id(self.chain_id)?;
        if self.feed_capacity == 0 {
            return Err(TipstreamError::Config("FEED_CAPACITY must be positive".into()));
        }
        if self.leaderboard_window == 0 {
            return Err(TipstreamError::Config("LEADERBOARD_WINDOW must be positive".into()));
        }
        let intervals = [
            ("CHECKPOINT_REFRESH_SECS", self.checkpoint_refresh_secs),
            ("PROJECTION_TICK_SECS", self.projection_tick_secs),
            ("LOW_BALANCE_CHECK_SECS", self.low_balance_check_secs),
            ("SNAPSHOT_POLL_SECS", self.snapshot_poll_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(TipstreamError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn chain(&self) -> Result<Chain> {
        Chain::from_id(self.chain_id)
    }

    pub fn checkpoint_refresh(&self) -> Duration {
        Duration::from_secs(self.checkpoint_refresh_secs)
    }

    pub fn projection_tick(&self) -> Duration {
        Duration::from_secs(self.projection_tick_secs)
    }

    pub fn low_balance_check(&self) -> Duration {
        Duration::from_secs(self.low_balance_check_secs)
    }

    pub fn snapshot_poll(&self) -> Duration {
        Duration::from_secs(self.snapshot_poll_secs)
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| TipstreamError::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
