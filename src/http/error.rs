//! Handler error types.
//!
//! Handlers return `Result<_, AppError>`; the error becomes a small JSON
//! response and is recorded on it so the access logger can report it. Errors
//! that do not end the request can be pushed to the request's [`ErrorLog`].

use std::convert::Infallible;
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Request-scoped failure returned by handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients.
    fn public_message(&self) -> String {
        match self {
            AppError::Unauthorized(msg)
            | AppError::BadRequest(msg)
            | AppError::PayloadTooLarge(msg) => msg.clone(),
            AppError::Internal(_) => self
                .status()
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Response envelope for errors.
#[derive(Debug, Serialize)]
pub struct Meta {
    pub status: u16,
    pub message: String,
}

/// Error message attached to a response built from an [`AppError`].
#[derive(Debug, Clone)]
pub struct RecordedError(pub String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let meta = Meta {
            status: status.as_u16(),
            message: self.public_message(),
        };
        let mut response = (status, Json(meta)).into_response();
        response
            .extensions_mut()
            .insert(RecordedError(self.to_string()));
        response
    }
}

/// Errors recorded while handling one request.
///
/// The access logger attaches one to every request; handlers extract it and
/// call [`ErrorLog::record`].
#[derive(Debug, Clone, Default)]
pub struct ErrorLog(Arc<Mutex<Vec<String>>>);

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: impl Display) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.to_string());
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain all recorded errors.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<S> FromRequestParts<S> for ErrorLog
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<ErrorLog>().cloned().unwrap_or_default())
    }
}
