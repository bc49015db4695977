//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, one task per connection)
//!     → connection.rs (HTTP/1.1 serving, lifecycle tracking)
//!     → application router
//!
//! Connection States:
//!     Active → Draining (graceful shutdown requested) → Closed
//! ```
//!
//! # Design Decisions
//! - Connection tasks live in a JoinSet owned by the accept loop so the
//!   lifecycle manager can wait for them or abort them
//! - Abandoned responses close the connection without a status line

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::{AcceptBackoff, Acceptor};
