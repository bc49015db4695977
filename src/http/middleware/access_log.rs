//! Structured access logging.
//!
//! Attaches a [`RequestContext`] and an [`ErrorLog`] to each request, replays
//! the body of mutating requests after taking a bounded snapshot, and emits
//! exactly one record per recorded error, or one success record when none were
//! recorded. Responses produced by the panic supervisor already carry their own
//! record and are passed through silently.

use std::collections::BTreeMap;
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::State,
    http::{header, HeaderMap, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::config::schema::DEFAULT_MAX_BODY_SIZE;
use crate::http::context::{self, RequestContext, X_FORWARDED_FOR};
use crate::http::error::{AppError, ErrorLog, RecordedError};
use crate::http::middleware::recovery::Supervised;
use crate::http::middleware::unix_timestamp;

pub const ACCESS_LOG_TARGET: &str = "access_log";

/// Longest body snapshot kept in a record unless configured otherwise.
pub const DEFAULT_MAX_DATA_LEN: usize = 4096;

/// Access logger options.
#[derive(Debug, Clone)]
pub struct AccessLogConfig {
    /// Request-context keys appended to every record.
    pub extra_keys: Arc<Vec<String>>,
    /// Mutating requests with a larger body are rejected with 413.
    pub max_body_size: usize,
    /// Snapshots are cut to this many bytes in the record.
    pub max_data_len: usize,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            extra_keys: Arc::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_data_len: DEFAULT_MAX_DATA_LEN,
        }
    }
}

impl AccessLogConfig {
    pub fn with_extra_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            extra_keys: Arc::new(keys.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_limits(mut self, max_body_size: usize, max_data_len: usize) -> Self {
        self.max_body_size = max_body_size;
        self.max_data_len = max_data_len;
        self
    }
}

/// Why the body snapshot of a mutating request could not be taken.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("reading request body: {0}")]
    Read(#[source] axum::Error),
}

impl From<SnapshotError> for AppError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            SnapshotError::Read(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

/// One emitted description of a request outcome.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub status: u16,
    pub method: String,
    pub path: String,
    pub query: String,
    pub ip: String,
    pub user_agent: String,
    pub time: u64,
    pub exec_time: f64,
    pub request_id: String,
    pub device_id: String,
    pub device_session_id: String,
    pub x_forwarded_for: String,
    pub cf_connecting_ip: String,
    /// Compacted body of mutating requests.
    pub data: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl LogRecord {
    pub fn emit(&self) {
        let extra = (!self.extra.is_empty())
            .then(|| serde_json::to_string(&self.extra).unwrap_or_default());

        tracing::info!(
            target: ACCESS_LOG_TARGET,
            status = self.status,
            method = %self.method,
            path = %self.path,
            query = %self.query,
            ip = %self.ip,
            user_agent = %self.user_agent,
            time = self.time,
            exec_time = self.exec_time,
            request_id = %self.request_id,
            device_id = %self.device_id,
            device_session_id = %self.device_session_id,
            x_forwarded_for = %self.x_forwarded_for,
            cf_connecting_ip = %self.cf_connecting_ip,
            data = self.data.as_deref(),
            extra = extra.as_deref(),
            "request completed"
        );
    }

    pub fn emit_error(&self, error: &str) {
        tracing::error!(
            target: ACCESS_LOG_TARGET,
            status = self.status,
            method = %self.method,
            path = %self.path,
            ip = %self.ip,
            time = self.time,
            exec_time = self.exec_time,
            request_id = %self.request_id,
            error = %error,
            "request failed"
        );
    }
}

/// Methods whose body is captured in the record.
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// JSON bodies are compacted; anything else is logged as lossy UTF-8.
pub fn compact_body(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Cut `data` to at most `max` bytes, on a char boundary.
pub fn truncate_data(mut data: String, max: usize) -> String {
    if data.len() > max {
        let mut end = max;
        while !data.is_char_boundary(end) {
            end -= 1;
        }
        data.truncate(end);
        data.push_str("...");
    }
    data
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Collect `body`, failing as soon as more than `limit` bytes arrive.
pub async fn read_body(mut body: Body, limit: usize) -> Result<Bytes, SnapshotError> {
    let mut buf = Vec::new();
    while let Some(frame) = poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await {
        let frame = frame.map_err(SnapshotError::Read)?;
        if let Ok(data) = frame.into_data() {
            if buf.len() + data.len() > limit {
                return Err(SnapshotError::TooLarge { limit });
            }
            buf.extend_from_slice(&data);
        }
    }
    Ok(Bytes::from(buf))
}

/// Snapshot the body of a mutating request and rebuild the request around it.
///
/// The handler never runs on a body that could not be read in full.
async fn snapshot(
    request: Request<Body>,
    config: &AccessLogConfig,
) -> Result<(Request<Body>, Option<String>), SnapshotError> {
    if !is_mutating(request.method()) {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    if declared_length(&parts.headers).is_some_and(|len| len > config.max_body_size) {
        return Err(SnapshotError::TooLarge {
            limit: config.max_body_size,
        });
    }

    let bytes = read_body(body, config.max_body_size).await?;
    let data = truncate_data(compact_body(&bytes), config.max_data_len);
    Ok((Request::from_parts(parts, Body::from(bytes)), Some(data)))
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn access_log_middleware(
    State(config): State<AccessLogConfig>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();

    let request_id = context::begin(&mut request);
    let ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(RequestContext::detached);

    let errors = ErrorLog::new();
    request.extensions_mut().insert(errors.clone());

    let headers = request.headers();
    let mut record = LogRecord {
        status: 0,
        method: method.to_string(),
        path,
        query,
        ip: ctx.client_ip().to_string(),
        user_agent: header_str(headers, header::USER_AGENT.as_str()),
        time: 0,
        exec_time: 0.0,
        request_id: request_id.to_string(),
        device_id: header_str(headers, "device_id"),
        device_session_id: header_str(headers, "device_session_id"),
        x_forwarded_for: header_str(headers, X_FORWARDED_FOR),
        cf_connecting_ip: header_str(headers, "cf-connecting-ip"),
        data: None,
        extra: BTreeMap::new(),
    };

    let response = match snapshot(request, &config).await {
        Ok((request, data)) => {
            record.data = data;
            next.run(request).await
        }
        Err(err) => AppError::from(err).into_response(),
    };

    if response.extensions().get::<Supervised>().is_some() {
        return response;
    }

    record.status = response.status().as_u16();
    record.time = unix_timestamp();
    record.exec_time = start.elapsed().as_secs_f64() * 1000.0;

    // handlers may return a derived context carrying extra values
    let scope = response.extensions().get::<RequestContext>().unwrap_or(&ctx);
    for key in config.extra_keys.iter() {
        record
            .extra
            .insert(key.clone(), scope.value(key).to_string());
    }

    let mut failures = errors.take();
    if let Some(RecordedError(message)) = response.extensions().get::<RecordedError>() {
        failures.push(message.clone());
    }

    if failures.is_empty() {
        record.emit();
    } else {
        for failure in &failures {
            record.emit_error(failure);
        }
    }

    response
}
