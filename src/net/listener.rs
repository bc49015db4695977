//! TCP accept loop.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections until told to stop
//! - Spawn one task per connection and hand the set back for draining
//! - Skip per-connection accept errors; back off on anything else
//!   (e.g. `EMFILE`) instead of giving up on open connections

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::net::connection::{serve_connection, ConnectionTracker};

/// Source of accepted connections.
pub trait Acceptor: Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Bind a listener on `host:port`.
pub async fn bind(host: &str, port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    tracing::info!(address = %listener.local_addr()?, "Listener bound");
    Ok(listener)
}

/// Errors that concern a single incoming connection, not the listener.
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Delay between accept retries: 5ms doubling up to 1s, reset on success.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    const MIN: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => Self::MIN,
            Some(last) => (last * 2).min(Self::MAX),
        };
        self.current = Some(delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Accept connections until `stop` fires, then close the listener and return
/// the still-running connection tasks.
pub async fn accept_loop<A: Acceptor>(
    mut listener: A,
    app: Router,
    tracker: ConnectionTracker,
    mut stop: oneshot::Receiver<()>,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();
    let mut backoff = AcceptBackoff::default();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = joined {
                    tracing::warn!(error = %err, "Connection task failed");
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) if is_connection_error(&err) => {
                        tracing::debug!(error = %err, "Accept failed for one connection");
                        continue;
                    }
                    Err(err) => {
                        let delay = backoff.next_delay();
                        tracing::error!(
                            error = %err,
                            retry_in_ms = delay.as_millis() as u64,
                            open_connections = connections.len(),
                            "Accept failed, retrying"
                        );
                        tokio::select! {
                            _ = &mut stop => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                };
                backoff.reset();
                connections.spawn(serve_connection(
                    stream,
                    peer,
                    app.clone(),
                    tracker.track(),
                    tracker.drain_receiver(),
                ));
            }
        }
    }

    tracing::debug!(open_connections = connections.len(), "Listener closed");
    connections
}
