//! Bearer authorization check.
//!
//! Only the header shape is validated: `Authorization: Bearer <token>`.
//! Token verification is not implemented.

use axum::{
    body::Body,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::http::error::AppError;

/// Raw bearer token, attached to requests that passed the shape check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

/// Parse `Bearer <token>`. Exactly two space-separated segments are accepted.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let mut segments = value.split(' ');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("Bearer"), Some(token), None) => Some(token),
        _ => None,
    }
}

pub async fn require_bearer(mut request: Request<Body>, next: Next) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized("missing or malformed bearer token".into()))?;

    request.extensions_mut().insert(BearerToken(token));
    Ok(next.run(request).await)
}
