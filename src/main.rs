//! Service bootstrap binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net::listener ──▶ net::connection
//!                                            │
//!                                            ▼
//!                     ┌──────────────────────────────────────────┐
//!                     │ CORS gate → access log → panic recovery  │
//!                     │                  → routes                │
//!                     └──────────────────────────────────────────┘
//!
//!     config (loaded once, Arc-shared)     lifecycle (signal → drain ≤ 30s)
//! ```
//!
//! Exit codes: 99 when configuration cannot be loaded, 1 when the listener
//! fails, 0 after a shutdown.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use service_bootstrap::config::{AppConfig, ConfigLoader};
use service_bootstrap::http::routes;
use service_bootstrap::lifecycle::startup;
use service_bootstrap::observability::logging;

/// Exit code when configuration loading fails before the listener starts.
const CONFIG_EXIT_CODE: u8 = 99;
const SERVE_EXIT_CODE: u8 = 1;

#[derive(Parser)]
#[command(name = "service-bootstrap")]
#[command(about = "HTTP service with structured access logs and graceful shutdown", long_about = None)]
struct Cli {
    /// Overlay configuration file (TOML, YAML, JSON, ...). Missing files are ignored.
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::from_env();
    if let Some(path) = cli.config {
        loader = loader.overlay_file(path);
    }

    let loaded = match loader.load() {
        Ok(loaded) => loaded,
        Err(err) => {
            let defaults = AppConfig::default();
            let _ = logging::init(&defaults.logging, &defaults.run_mode);
            tracing::error!(error = %err, "Configuration load failed");
            return ExitCode::from(CONFIG_EXIT_CODE);
        }
    };

    let config = Arc::new(loaded.config);
    if let Err(err) = logging::init(&config.logging, &config.run_mode) {
        eprintln!("logging already initialised: {err}");
    }

    for err in &loaded.overlay_errors {
        tracing::warn!(error = %err, "Overlay configuration ignored, using defaults");
    }

    tracing::info!(
        address = %config.address(),
        run_mode = %config.run_mode,
        env = %config.env,
        datastore_host = %config.datastore.host,
        datastore_max_open = config.datastore.max_open,
        log_format = ?config.logging.format,
        "Configuration loaded"
    );

    match startup::run(config, routes::router()).await {
        Ok(report) => {
            tracing::info!(outcome = ?report.outcome, "Exiting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Server failed");
            ExitCode::from(SERVE_EXIT_CODE)
        }
    }
}
