//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config loaded → Bind listener → Accept loop on background task
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Shutdown has a deadline: connections still open afterwards are closed
//! - Shutdown failures are logged, never turned into a crash

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{DrainOutcome, Shutdown, ShutdownError, ShutdownReport, DEFAULT_DRAIN_TIMEOUT};
