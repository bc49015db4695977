//! Cross-origin policy gate.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v.trim() == "*")
}

/// Build the CORS layer described by `config`. Unparseable entries are skipped.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let methods: Vec<Method> = config
        .allow_methods
        .iter()
        .filter_map(|m| match m.trim().to_ascii_uppercase().parse::<Method>() {
            Ok(method) => Some(method),
            Err(_) => {
                tracing::warn!(method = %m, "Ignoring invalid CORS method");
                None
            }
        })
        .collect();

    let origins = if is_wildcard(&config.allow_origins) {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(config.allow_origins.iter().filter_map(|o| {
            HeaderValue::from_str(o.trim())
                .inspect_err(|_| tracing::warn!(origin = %o, "Ignoring invalid CORS origin"))
                .ok()
        }))
    };

    let headers = if is_wildcard(&config.allow_headers) {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(config.allow_headers.iter().filter_map(|h| {
            HeaderName::from_bytes(h.trim().as_bytes())
                .inspect_err(|_| tracing::warn!(header = %h, "Ignoring invalid CORS header"))
                .ok()
        }))
    };

    // credentials cannot be combined with wildcards
    let wildcard = is_wildcard(&config.allow_origins) || is_wildcard(&config.allow_headers);
    let credentials = config.allow_credentials && !wildcard;
    if config.allow_credentials && wildcard {
        tracing::warn!("CORS credentials disabled: not allowed together with wildcard origins or headers");
    }

    CorsLayer::new()
        .allow_methods(methods)
        .allow_origin(origins)
        .allow_headers(headers)
        .allow_credentials(credentials)
        .max_age(Duration::from_secs(config.max_age_secs))
}
