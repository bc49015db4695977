//! Request pipeline middleware.
//!
//! # Data Flow
//! ```text
//! request
//!     → cors.rs (policy gate, answers preflights)
//!     → access_log.rs (context, body snapshot, one record per outcome)
//!     → recovery.rs (panic containment)
//!     → auth.rs (optional, per route)
//!     → handler
//! ```

pub mod access_log;
pub mod auth;
pub mod cors;
pub mod recovery;

use std::time::{SystemTime, UNIX_EPOCH};

pub use access_log::{
    access_log_middleware, AccessLogConfig, LogRecord, SnapshotError, ACCESS_LOG_TARGET,
};
pub use auth::{require_bearer, BearerToken};
pub use cors::cors_layer;
pub use recovery::{recovery_middleware, Abandoned, RecoveryConfig, Supervised, RECOVERY_TARGET};

/// Seconds since the Unix epoch.
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
