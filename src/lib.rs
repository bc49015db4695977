//! HTTP service bootstrap: layered configuration, a request pipeline that gives
//! every request an identity and one structured log record, panic containment,
//! and a listener lifecycle with a bounded graceful drain.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{AppConfig, ConfigLoader};
pub use http::{AppError, ErrorLog, HttpServer, RequestContext};
pub use lifecycle::{DrainOutcome, Shutdown, ShutdownReport};
