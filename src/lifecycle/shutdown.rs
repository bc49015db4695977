//! Shutdown coordination and timeout-bounded draining.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

use crate::net::ConnectionTracker;

/// Grace period given to in-flight requests once shutdown starts.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Manual shutdown trigger.
///
/// Useful where no OS signal is involved, e.g. when embedding the server in
/// tests or in a larger process.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Future resolving once [`Shutdown::trigger`] is called or every
    /// trigger handle is dropped.
    pub fn signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// How draining ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight connection finished before the deadline.
    Drained,
    /// The deadline passed; `forced` connections were closed.
    TimedOut { forced: usize },
    /// The accept loop task failed during shutdown; its connections were dropped.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcome: DrainOutcome,
    pub elapsed: Duration,
}

/// Failure while shutting down. Logged, never fatal.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("accept loop task failed: {0}")]
    Task(#[source] JoinError),
}

/// Let in-flight connections finish, closing whatever is left at `timeout`.
pub async fn drain(
    connections: &mut JoinSet<()>,
    tracker: &ConnectionTracker,
    timeout: Duration,
) -> DrainOutcome {
    tracker.begin_drain();

    let finished = tokio::time::timeout(timeout, async {
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "Connection task failed while draining");
            }
        }
    })
    .await;

    match finished {
        Ok(()) => DrainOutcome::Drained,
        Err(_) => {
            let forced = connections.len();
            connections.shutdown().await;
            DrainOutcome::TimedOut { forced }
        }
    }
}

pub(crate) fn report(started: Instant, outcome: DrainOutcome) -> ShutdownReport {
    let report = ShutdownReport {
        outcome,
        elapsed: started.elapsed(),
    };
    match outcome {
        DrainOutcome::Drained => {
            tracing::info!(elapsed_ms = report.elapsed.as_millis() as u64, "Shutdown complete");
        }
        DrainOutcome::TimedOut { forced } => {
            tracing::warn!(
                forced_connections = forced,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Shutdown timed out, remaining connections closed"
            );
        }
        DrainOutcome::Aborted => {
            tracing::warn!("Shutdown aborted, open connections dropped");
        }
    }
    report
}
