//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use service_bootstrap::config::AppConfig;
use service_bootstrap::http::{HttpServer, ServerError};
use service_bootstrap::lifecycle::{Shutdown, ShutdownReport};

/// One captured log event.
#[derive(Debug, Clone)]
pub struct Captured {
    pub target: String,
    pub level: Level,
    pub fields: BTreeMap<String, String>,
}

impl Captured {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Tracing layer recording every event in memory.
#[derive(Debug, Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<Captured>>>);

impl Capture {
    /// Route events of the current thread into this capture.
    ///
    /// Use with `#[tokio::test]` (current-thread runtime) so spawned tasks
    /// log into the same subscriber.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn records(&self, target: &str) -> Vec<Captured> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.target == target)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

#[derive(Default)]
struct FieldVisitor(BTreeMap<String, String>);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.0.lock().unwrap().push(Captured {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            fields: visitor.0,
        });
    }
}

/// Config listening on an ephemeral loopback port.
pub fn local_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..AppConfig::default()
    }
}

/// A server running on a background task.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<ShutdownReport, ServerError>>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the drain report.
    pub async fn stop(self) -> ShutdownReport {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server failed")
    }
}

/// Bind `routes` behind the full pipeline and serve until stopped.
pub async fn start_server(routes: Router, drain_timeout: Duration) -> RunningServer {
    let server = HttpServer::new(Arc::new(local_config()), routes)
        .with_drain_timeout(drain_timeout)
        .bind()
        .await
        .expect("bind");
    let addr = server.local_addr().expect("local addr");

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    let handle = tokio::spawn(server.run_until(signal));

    RunningServer {
        addr,
        shutdown,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
