//! CORS response headers and client address resolution.
//!
//! # Responsibilities
//! - Build the `Allow` method list for OPTIONS
//! - Emit the preflight header set when an `Origin` is present
//! - Echo the origin on ordinary responses
//! - Resolve the client address through `X-Forwarded-For` / `X-Real-IP`

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use std::net::SocketAddr;

/// Request headers a cross-origin client may send.
pub const CORS_ALLOW_HEADERS: &str =
    "Origin,Accept,Content-Type,Content-Length,X-Requested-With,Key,Token,Authorization";

const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Comma-joined methods a route answers, plus `HEAD` when `GET` is present
/// and always `OPTIONS`.
pub fn allow_list(methods: &[Method]) -> String {
    let head = methods.contains(&Method::GET).then_some(Method::HEAD);
    let options = Method::OPTIONS;
    let mut allowed: Vec<&str> = Vec::with_capacity(methods.len() + 2);
    for method in methods.iter().chain(head.iter()).chain(std::iter::once(&options)) {
        if !allowed.contains(&method.as_str()) {
            allowed.push(method.as_str());
        }
    }
    allowed.join(",")
}

/// Headers for an OPTIONS response.
pub fn preflight_headers(request: &HeaderMap, methods: &[Method]) -> HeaderMap {
    let allow = allow_list(methods);
    let mut headers = HeaderMap::new();
    let Ok(allow) = HeaderValue::from_str(&allow) else {
        return headers;
    };
    headers.insert(header::ALLOW, allow.clone());
    if let Some(origin) = request.get(header::ORIGIN) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, allow);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        );
    }
    headers
}

/// Origin echo for a regular cross-origin response.
pub fn apply_cors(request: &HeaderMap, response: &mut HeaderMap) {
    if let Some(origin) = request.get(header::ORIGIN) {
        response.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        response.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the transport peer.
pub fn client_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = forwarded {
        return addr.to_string();
    }
    headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string())
}
