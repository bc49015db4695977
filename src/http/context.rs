//! Per-request context.
//!
//! Every inbound request gets a [`RequestContext`] carrying its identity and
//! timing. The context is stored in the request extensions and travels with the
//! request through the handler chain. It is immutable: deriving a context with
//! an extra value returns a new one sharing the original core.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{request::Parts, Extensions, HeaderMap, Request};
use uuid::Uuid;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Opaque, collision-resistant request identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Generate a new unique request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn empty() -> Self {
        Self(Arc::from(""))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct Core {
    request_id: RequestId,
    client_ip: String,
    start: Instant,
    uri: String,
}

/// Identity and timing metadata of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    core: Arc<Core>,
    values: Arc<BTreeMap<String, String>>,
}

impl RequestContext {
    /// Derive a fresh context for `request`.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            core: Arc::new(Core {
                request_id: RequestId::new(),
                client_ip: client_ip_from(request.headers(), peer),
                start: Instant::now(),
                uri: request.uri().to_string(),
            }),
            values: Arc::default(),
        }
    }

    /// A context with no identity, used when none was attached.
    pub fn detached() -> Self {
        Self {
            core: Arc::new(Core {
                request_id: RequestId::empty(),
                client_ip: String::new(),
                start: Instant::now(),
                uri: String::new(),
            }),
            values: Arc::default(),
        }
    }

    /// Derive a context carrying one more value. `self` is left untouched.
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut values = BTreeMap::clone(&self.values);
        values.entry(key.into()).or_insert_with(|| value.into());
        Self {
            core: Arc::clone(&self.core),
            values: Arc::new(values),
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.core.request_id
    }

    pub fn client_ip(&self) -> &str {
        &self.core.client_ip
    }

    pub fn uri(&self) -> &str {
        &self.core.uri
    }

    pub fn start(&self) -> Instant {
        self.core.start
    }

    /// Milliseconds since the context was created, with sub-millisecond precision.
    pub fn elapsed_millis(&self) -> f64 {
        self.core.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Value stored under `key`, or the empty string.
    pub fn value(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Derive a context for `request` and attach it. Returns the new request ID.
///
/// A context already attached to the request is kept as is.
pub fn begin<B>(request: &mut Request<B>) -> RequestId {
    if let Some(existing) = request.extensions().get::<RequestContext>() {
        return existing.request_id().clone();
    }
    let context = RequestContext::from_request(request);
    let id = context.request_id().clone();
    request.extensions_mut().insert(context);
    id
}

pub fn request_id(extensions: &Extensions) -> &str {
    extensions
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id().as_str())
        .unwrap_or("")
}

pub fn client_ip(extensions: &Extensions) -> &str {
    extensions
        .get::<RequestContext>()
        .map(RequestContext::client_ip)
        .unwrap_or("")
}

pub fn uri(extensions: &Extensions) -> &str {
    extensions
        .get::<RequestContext>()
        .map(RequestContext::uri)
        .unwrap_or("")
}

pub fn elapsed_millis(extensions: &Extensions) -> f64 {
    extensions
        .get::<RequestContext>()
        .map(RequestContext::elapsed_millis)
        .unwrap_or(0.0)
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub fn client_ip_from(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').map(str::trim).find(|hop| !hop.is_empty()));

    let real_ip = || {
        headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(RequestContext::detached))
    }
}
