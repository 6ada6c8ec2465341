//! Linear stream projection
//!
//! Projects a checkpoint forward to `now` using integer arithmetic only.
//! Total over its input domain: a `now` before the start clamps elapsed to 0,
//! a zero rate yields zero remaining time, products saturate.

use tipstream_core::UnixSeconds;

use crate::types::{ProjectedState, StreamCheckpoint};

pub fn project(checkpoint: &StreamCheckpoint, now: UnixSeconds) -> ProjectedState {
    if !checkpoint.active {
        return ProjectedState::default();
    }

    let elapsed = now.saturating_sub(checkpoint.start_time);
    let balance = checkpoint.balance_at_checkpoint;
    let rate = checkpoint.rate_per_second;

    let consumed = (elapsed as u128).saturating_mul(rate).min(balance);
    let remaining_balance = balance - consumed;
    let remaining_time = if rate == 0 || remaining_balance == 0 {
        0
    } else {
        u64::try_from(remaining_balance / rate).unwrap_or(u64::MAX)
    };

    ProjectedState {
        elapsed,
        consumed,
        remaining_balance,
        remaining_time,
    }
}

/// Seconds of runtime a checkpoint buys from its start
pub fn total_runtime(checkpoint: &StreamCheckpoint) -> u64 {
    if checkpoint.rate_per_second == 0 {
        return 0;
    }
    u64::try_from(checkpoint.balance_at_checkpoint / checkpoint.rate_per_second).unwrap_or(u64::MAX)
}
