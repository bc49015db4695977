//! Structured logging.
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - JSON format for machine parsing, human format for development
//! - `RUST_LOG` wins over the level derived from the run mode

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(run_mode: &str) -> &'static str {
    match run_mode {
        "debug" => "service_bootstrap=debug,access_log=info,panic_recovery=info,tower_http=debug",
        _ => "info",
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(logging: &LoggingConfig, run_mode: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(run_mode)));

    let (json, pretty) = match logging.format {
        LogFormat::Json => (Some(fmt::layer().json().with_current_span(false)), None),
        LogFormat::Pretty => (None, Some(fmt::layer().with_target(true))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
}
