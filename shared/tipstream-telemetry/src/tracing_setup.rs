//! Tracing Setup
//!
//! `RUST_LOG` wins when it is set; otherwise the service's configured level
//! applies. Invalid directives are an error instead of being skipped.

use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Per-tick chatter stays at `warn` unless `RUST_LOG` asks for it
const QUIET_TARGETS: &[&str] = &["tipstream_engine::scheduler"];

pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => build_filter(&directives, false)?,
        _ => build_filter(&config.log_level, true)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(config.json_logs.then(|| {
            fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true)
        }))
        .with((!config.json_logs).then(|| fmt::layer().compact().with_target(false)))
        .try_init()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        log_level = %config.log_level,
        json_logs = config.json_logs,
        "Tracing initialized"
    );
    Ok(())
}

/// Parse `directives`, optionally adding the quiet-target defaults
pub fn build_filter(directives: &str, quiet_defaults: bool) -> Result<EnvFilter, TelemetryError> {
    let mut filter = EnvFilter::try_new(directives)
        .map_err(|e| TelemetryError::InvalidFilter(format!("{:?}: {}", directives, e)))?;
    if quiet_defaults {
        for target in QUIET_TARGETS {
            let directive = format!("{}=warn", target)
                .parse::<Directive>()
                .map_err(|e| TelemetryError::InvalidFilter(format!("{}: {}", target, e)))?;
            filter = filter.add_directive(directive);
        }
    }
    Ok(filter)
}
