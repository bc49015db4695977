//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap the application routes in the request pipeline
//!   (policy gate → access logger → panic supervisor → routes)
//! - Bind the listener at `host:port`
//! - Run the accept loop on a background task until a shutdown signal
//! - Drain in-flight requests, bounded by the drain timeout

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinError;

use crate::config::AppConfig;
use crate::http::middleware::{
    access_log_middleware, cors_layer, recovery_middleware, AccessLogConfig, RecoveryConfig,
};
use crate::lifecycle::shutdown::{self, DrainOutcome, ShutdownError, ShutdownReport};
use crate::lifecycle::DEFAULT_DRAIN_TIMEOUT;
use crate::net::connection::ConnectionTracker;
use crate::net::listener;

/// Fatal server failure. The process should exit.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("listener failed: {0}")]
    Serve(#[source] io::Error),

    #[error("accept loop task failed: {0}")]
    Task(#[source] JoinError),
}

/// HTTP server wrapping application routes in the request pipeline.
pub struct HttpServer {
    router: Router,
    config: Arc<AppConfig>,
    drain_timeout: Duration,
}

impl HttpServer {
    pub fn new(config: Arc<AppConfig>, routes: Router) -> Self {
        let router = Self::build_router(&config, routes);
        Self {
            router,
            config,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Compose the middleware chain around `routes`.
    ///
    /// Layers added last run first, so the policy gate is outermost and the
    /// supervisor sits directly around the routes.
    pub fn build_router(config: &AppConfig, routes: Router) -> Router {
        let recovery = RecoveryConfig {
            stack: config.logging.panic_stack,
        };
        let access_log = AccessLogConfig::with_extra_keys(config.logging.extra_keys.iter().cloned())
            .with_limits(config.max_body_size, config.logging.max_data_len);

        routes
            .layer(middleware::from_fn_with_state(recovery, recovery_middleware))
            .layer(middleware::from_fn_with_state(access_log, access_log_middleware))
            .layer(cors_layer(&config.cors))
    }

    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let listener = listener::bind(&self.config.host, self.config.port)
            .await
            .map_err(|source| ServerError::Bind {
                address: self.config.address(),
                source,
            })?;

        Ok(BoundServer {
            listener,
            router: self.router,
            drain_timeout: self.drain_timeout,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// A server whose listener is bound but not yet accepting.
pub struct BoundServer {
    listener: TcpListener,
    router: Router,
    drain_timeout: Duration,
}

impl BoundServer {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `signal` resolves, then drain.
    ///
    /// Returns an error only when the listener fails on its own; shutdown
    /// problems are logged and reported through [`ShutdownReport`].
    pub async fn run_until<F>(self, signal: F) -> Result<ShutdownReport, ServerError>
    where
        F: Future<Output = ()>,
    {
        let address = self.local_addr().map_err(ServerError::Serve)?;
        tracing::info!(address = %address, "Starting server");

        let tracker = ConnectionTracker::new();
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut accept = tokio::spawn(listener::accept_loop(
            self.listener,
            self.router,
            tracker.clone(),
            stop_rx,
        ));

        tokio::select! {
            _ = signal => {}
            joined = &mut accept => {
                let err = match joined {
                    Ok(_) => ServerError::Serve(io::Error::other("accept loop stopped unexpectedly")),
                    Err(err) => ServerError::Task(err),
                };
                tracing::error!(error = %err, "Opening HTTP server failed");
                return Err(err);
            }
        }

        tracing::info!(
            active_connections = tracker.active_count(),
            drain_timeout_secs = self.drain_timeout.as_secs_f64(),
            "Shutting down..."
        );
        let started = Instant::now();
        let _ = stop_tx.send(());

        let outcome = match accept.await {
            Ok(mut connections) => {
                shutdown::drain(&mut connections, &tracker, self.drain_timeout).await
            }
            Err(err) => {
                let err = ShutdownError::Task(err);
                tracing::error!(error = %err, "Shutdown error");
                DrainOutcome::Aborted
            }
        };

        Ok(shutdown::report(started, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_creation() {
        let config = Arc::new(AppConfig::default());
        let server = HttpServer::new(config.clone(), Router::new());
        assert_eq!(server.config().port, config.port);
        assert_eq!(server.drain_timeout, DEFAULT_DRAIN_TIMEOUT);

        let server = server.with_drain_timeout(Duration::from_secs(1));
        assert_eq!(server.drain_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let mut config = AppConfig::default();
        config.host = "256.0.0.1".into();
        let err = HttpServer::new(Arc::new(config), Router::new())
            .bind()
            .await
            .err()
            .expect("bind should fail");
        assert!(matches!(err, ServerError::Bind { ref address, .. } if address == "256.0.0.1:8080"));
    }
}
