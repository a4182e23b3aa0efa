// gamedetect/core/api/src/redirect.rs

// Canonical host and path redirects
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

/// Target of the permanent redirect, or `None` when the request is already
/// HTTPS on the canonical domain.
///
/// TLS terminates upstream, so the scheme comes from `X-Forwarded-Proto`.
pub fn canonical_redirect(domain: &str, scheme: &str, host: &str, path_and_query: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    if scheme.eq_ignore_ascii_case("https") && host.eq_ignore_ascii_case(domain) {
        return None;
    }
    Some(format!("https://{}{}", domain, path_and_query))
}

fn forwarded_scheme(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("http")
}

/// Middleware redirecting to `https://<domain>` with 308
pub async fn enforce_canonical_host(
    State(domain): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or_default();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    match canonical_redirect(&domain, forwarded_scheme(headers), host, path_and_query) {
        Some(location) => {
            debug!("Redirecting {}{} to {}", host, path_and_query, location);
            (
                StatusCode::PERMANENT_REDIRECT,
                [(header::LOCATION, location)],
            )
                .into_response()
        }
        None => next.run(request).await,
    }
}

/// `/x/` and `/x/?q` map to `/x` and `/x?q`; the root path never redirects
pub fn trimmed_path(path: &str, query: Option<&str>) -> Option<String> {
    if path == "/" || !path.ends_with('/') {
        return None;
    }
    let trimmed = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    Some(match query {
        Some(query) => format!("{}?{}", trimmed, query),
        None => trimmed.to_string(),
    })
}

/// Middleware redirecting trailing-slash paths to their canonical form with 308
pub async fn remove_trailing_slash(request: Request, next: Next) -> Response {
    match trimmed_path(request.uri().path(), request.uri().query()) {
        Some(location) => (
            StatusCode::PERMANENT_REDIRECT,
            [(header::LOCATION, location)],
        )
            .into_response(),
        None => next.run(request).await,
    }
}
