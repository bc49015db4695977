//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! environment variables
//!     → loader.rs phase 1 (primary fields, defaults when unset)
//!     → validation.rs (semantic checks)
//! overlay file + DATABASE_* variables
//!     → loader.rs phase 2 (best-effort, per-group fallback)
//!     → AppConfig (immutable)
//!     → shared via Arc to the middleware chain and the server
//! ```
//!
//! # Design Decisions
//! - Config is loaded once and never mutated afterwards
//! - Phase 1 failures are fatal, phase 2 failures only degrade to defaults
//! - The loader reads an explicit variable snapshot, never ambient globals

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigError, ConfigLoader, Loaded, OverlayError};
pub use schema::{AppConfig, CorsConfig, DatabaseConfig, DatastoreConfig, LogFormat, LoggingConfig};
