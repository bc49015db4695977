//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! connection (net)
//!     → server.rs (middleware chain composition)
//!     → middleware/ (policy gate, access log, panic recovery, auth)
//!     → context.rs (per-request identity, read by handlers and logs)
//!     → routes.rs / application routes
//!     → error.rs (handler failures → responses + recorded errors)
//! ```

pub mod context;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use context::{RequestContext, RequestId};
pub use error::{AppError, ErrorLog};
pub use server::{BoundServer, HttpServer, ServerError};
