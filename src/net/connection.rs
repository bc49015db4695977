//! Per-connection serving and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Serve HTTP/1.1 on an accepted stream through the application router
//! - Switch a connection to graceful mode when draining starts
//! - Drop connections whose response was abandoned by the panic supervisor

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    Router,
};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tower::ServiceExt;

use crate::http::middleware::recovery::{is_disconnect, Abandoned};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts open connections and tells them when to drain.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    drain_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            drain_tx: Arc::new(tx),
        }
    }

    /// Record a new open connection. The returned guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Ask every connection to finish its in-flight request and close.
    pub fn begin_drain(&self) {
        self.drain_tx.send_replace(true);
    }

    pub fn is_draining(&self) -> bool {
        *self.drain_tx.borrow()
    }

    pub fn drain_receiver(&self) -> watch::Receiver<bool> {
        self.drain_tx.subscribe()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Service error returned for abandoned responses; hyper closes the
/// connection without writing anything.
#[derive(Debug, Error)]
#[error("connection abandoned after transport fault")]
pub struct ConnectionAbandoned;

fn is_abandoned(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<ConnectionAbandoned>() {
            return true;
        }
        current = err.source();
    }
    false
}

/// Serve one accepted connection until it closes.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    guard: ConnectionGuard,
    mut drain: watch::Receiver<bool>,
) {
    let id = guard.id();
    tracing::debug!(connection_id = %id, peer_addr = %peer, "Connection accepted");

    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        let app = app.clone();
        async move {
            let response = match app.oneshot(request.map(Body::new)).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            if response.extensions().get::<Abandoned>().is_some() {
                return Err(ConnectionAbandoned);
            }
            Ok(response)
        }
    });

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(conn);

    let mut draining = *drain.borrow_and_update();
    if draining {
        conn.as_mut().graceful_shutdown();
    }

    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            Ok(()) = drain.changed(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    match result {
        Ok(()) => {}
        Err(err) if is_abandoned(&err) => {
            tracing::debug!(connection_id = %id, peer_addr = %peer, "Connection abandoned");
        }
        Err(err) if is_disconnect(&err) => {
            tracing::debug!(connection_id = %id, peer_addr = %peer, error = %err, "Client disconnected");
        }
        Err(err) => {
            tracing::warn!(connection_id = %id, peer_addr = %peer, error = %err, "Connection error");
        }
    }
    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.clone().track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_reaches_existing_receivers() {
        let tracker = ConnectionTracker::new();
        let mut rx = tracker.drain_receiver();
        assert!(!tracker.is_draining());

        tracker.begin_drain();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(tracker.is_draining());
    }

    #[test]
    fn abandoned_is_found_in_chain() {
        let err: Box<dyn StdError + Send + Sync> = Box::new(ConnectionAbandoned);
        assert!(is_abandoned(err.as_ref()));
        let other = std::io::Error::other("nope");
        assert!(!is_abandoned(&other));
    }
}
