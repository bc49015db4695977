//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured key-value records)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//! ```
//!
//! # Design Decisions
//! - Access and panic records use their own targets (`access_log`,
//!   `panic_recovery`) so they can be filtered or routed separately
//! - Request ID flows through every record of a request

pub mod logging;
