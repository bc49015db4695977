//! Built-in routes.

use axum::{
    body::Bytes,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;

use crate::http::context::RequestContext;
use crate::http::middleware::{require_bearer, BearerToken};

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct Caller {
    request_id: String,
    client_ip: String,
    token_len: usize,
}

pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/echo", post(echo))
        .route(
            "/whoami",
            get(whoami).route_layer(middleware::from_fn(require_bearer)),
        )
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn echo(body: Bytes) -> Bytes {
    body
}

async fn whoami(ctx: RequestContext, Extension(token): Extension<BearerToken>) -> Json<Caller> {
    Json(Caller {
        request_id: ctx.request_id().to_string(),
        client_ip: ctx.client_ip().to_string(),
        token_len: token.0.len(),
    })
}
