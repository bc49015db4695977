//! Startup orchestration.
//!
//! # Design Decisions
//! - Fail fast: bind and serve errors are returned to the caller as fatal
//! - The calling task only waits for the interrupt, then drives the drain

use std::sync::Arc;

use axum::Router;

use crate::config::AppConfig;
use crate::http::server::{HttpServer, ServerError};
use crate::lifecycle::shutdown::ShutdownReport;
use crate::lifecycle::signals;

/// Serve `routes` behind the request pipeline until the process is interrupted.
pub async fn run(config: Arc<AppConfig>, routes: Router) -> Result<ShutdownReport, ServerError> {
    HttpServer::new(config, routes)
        .bind()
        .await?
        .run_until(signals::interrupt())
        .await
}
