//! Periodic dashboard summary in the logs

use tipstream_core::{Amount, Chain};
use tipstream_engine::{DashboardEngine, StreamState};
use tracing::info;

const DECIMALS: u32 = 18;

/// Whole-unit rendering with four decimals. Only used for display.
pub fn format_amount(amount: Amount, chain: Chain) -> String {
    let unit = 10u128.pow(DECIMALS);
    let whole = amount / unit;
    let frac = (amount % unit) / 10u128.pow(DECIMALS - 4);
    format!("{}.{:04} {}", whole, frac, chain.symbol())
}

/// `1h 02m 03s` style countdown
pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

pub fn log_summary(engine: &DashboardEngine, chain: Chain) {
    let feed = engine.feed();
    let board = engine.leaderboard();
    let volume = engine.volume_breakdown();

    info!(
        feed_size = feed.len(),
        instant = %format_amount(volume.instant, chain),
        stream = %format_amount(volume.stream, chain),
        instant_pct = volume.instant_pct,
        stream_pct = volume.stream_pct,
        "Live feed"
    );

    for (position, entry) in board.entries.iter().enumerate() {
        info!(
            rank = position + 1,
            payer = %entry.payer.short(),
            total = %format_amount(entry.total_amount, chain),
            tips = entry.tip_count,
            "Leaderboard"
        );
    }

    let view = engine.stream_view();
    if let StreamState::Active(checkpoint) = view.state {
        info!(
            rate_per_hour = %format_amount(checkpoint.rate_per_hour(), chain),
            remaining = %format_amount(view.projection.remaining_balance, chain),
            remaining_pct = view.projection.remaining_percent(checkpoint.balance_at_checkpoint),
            time_left = %format_duration(view.projection.remaining_time),
            low_balance = view.local_low_balance.is_low,
            authoritative_low = ?view.authoritative.map(|s| s.reading.is_low),
            stale = view.authoritative_stale,
            "Viewer stream"
        );
    }

    let comparison = engine.tipping().tracker().comparison();
    if let Some(avg) = comparison.monad_avg_ms {
        info!(avg_confirmation_ms = avg, speedup = ?comparison.speedup, "Tip confirmation latency");
    }
}
