//! Request dispatch: the single axum handler behind every path.
//!
//! # Data Flow
//! ```text
//! Request
//!     → WebSocket upgrade under a mount?  → handshake, endpoint binding
//!     → TRACE                              → echo as message/http
//!     → outside context path               → 404
//!     → HttpApp::resolve                   → 404 on miss
//!     → OPTIONS                            → Allow (+ CORS preflight)
//!     → method not allowed                 → 403
//!     → aggregate body (413 over limit)
//!     → HttpContext (parameters unified) + CORS headers
//!     → RouteAction::process
//! ```

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Version},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::http::context::HttpContext;
use crate::net::connection::ConnectionScope;
use crate::observability::metrics;
use crate::routing::HttpApp;
use crate::security::{headers, limits};
use crate::websocket::connection;

/// State shared by every request of one server.
#[derive(Clone)]
pub struct DispatchState {
    pub app: Arc<dyn HttpApp>,
    pub config: Arc<ServerConfig>,
}

/// Build the axum router: one fallback handler plus request tracing.
pub fn router(app: Arc<dyn HttpApp>, config: Arc<ServerConfig>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(DispatchState { app, config })
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(State(state): State<DispatchState>, request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let response = handle(&state, request).await;
    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

async fn handle(state: &DispatchState, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    tracing::debug!(method = %method, path = %path, peer_addr = %peer, "dispatching request");

    if is_websocket_upgrade(request.headers())
        && state.app.websocket_routes().mount_for(&path).is_some()
    {
        return upgrade(state, request).await;
    }

    if method == Method::TRACE {
        return trace(&request);
    }

    if !starts_with_ignore_case(&path, state.app.context_path()) {
        return status(StatusCode::NOT_FOUND);
    }
    let Some(route) = state.app.resolve(&method, &path) else {
        return status(StatusCode::NOT_FOUND);
    };

    if method == Method::OPTIONS {
        let allowed = headers::preflight_headers(request.headers(), route.methods());
        return (StatusCode::OK, allowed).into_response();
    }
    if !route.allows(&method) {
        return status(StatusCode::FORBIDDEN);
    }

    let (parts, body) = request.into_parts();
    let body = match limits::read_body(&parts.headers, body, state.config.http.max_content_size).await {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(path = %path, rejection = ?rejection, "request body rejected");
            return status(rejection.status());
        }
    };

    let mut cors = HeaderMap::new();
    headers::apply_cors(&parts.headers, &mut cors);

    let mut ctx = HttpContext::new(
        parts.method,
        parts.uri,
        parts.version,
        parts.headers,
        body,
        peer,
        route.route_path.clone(),
        state.config.clone(),
    )
    .await;
    ctx.response_headers_mut().extend(cors);

    route.action.process(&mut ctx).await;
    ctx.into_response()
}

async fn upgrade(state: &DispatchState, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    let binding = state
        .app
        .websocket_routes()
        .bind(parts.uri.path(), parts.uri.query());
    if binding.is_none() {
        tracing::warn!(path = %parts.uri.path(), "no WebSocket endpoint matches, closing after handshake");
    }
    let scope = parts
        .extensions
        .get::<ConnectionScope>()
        .cloned()
        .unwrap_or_else(ConnectionScope::detached);

    match <WebSocketUpgrade as FromRequestParts<DispatchState>>::from_request_parts(&mut parts, state).await {
        Ok(ws) => ws.on_upgrade(move |socket| connection::serve(socket, binding, scope)),
        Err(rejection) => {
            tracing::warn!(path = %parts.uri.path(), error = %rejection, "WebSocket upgrade rejected");
            rejection.into_response()
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn starts_with_ignore_case(path: &str, prefix: &str) -> bool {
    path.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Echo the request line and headers back as `message/http`.
fn trace(request: &Request) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut echo = format!("TRACE {target} {}", version_text(request.version()));
    for (name, value) in request.headers() {
        echo.push_str("\r\n");
        echo.push_str(name.as_str());
        echo.push_str(": ");
        echo.push_str(&String::from_utf8_lossy(value.as_bytes()));
    }
    echo.push_str("\r\n");

    let mut response = Response::new(Body::from(echo));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("message/http"),
    );
    response
}

fn version_text(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn status(code: StatusCode) -> Response {
    code.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{sync_action_fn, AppRouter};
    use tower::ServiceExt;

    fn app() -> Router {
        let app = AppRouter::new("/api")
            .route(
                "/hello",
                sync_action_fn(&[Method::GET], |ctx| {
                    let name = ctx.param("name").unwrap_or("world").to_string();
                    let _ = ctx.send(StatusCode::OK, HeaderMap::new(), format!("hello {name}"));
                }),
            )
            .route(
                "/form",
                sync_action_fn(&[Method::POST], |ctx| {
                    let values = ctx.params().get_all("k").join(",");
                    let _ = ctx.send(StatusCode::OK, HeaderMap::new(), values);
                }),
            )
            .route("/silent", sync_action_fn(&[Method::GET], |_ctx| {}));
        let mut config = ServerConfig::default();
        config.http.max_content_size = 32;
        router(Arc::new(app), Arc::new(config))
    }

    async fn call(request: axum::http::Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = app().oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (parts.status, parts.headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn routed_get_with_query() {
        let (status, _, body) = call(get("/api/hello?name=ann")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello ann");
    }

    #[tokio::test]
    async fn context_path_is_case_insensitive() {
        let (status, _, _) = call(get("/API/hello")).await;
        // the prefix check passes, the exact route lookup does not
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = call(get("/other/hello")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = call(get("/api/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn options_lists_allowed_methods() {
        let request = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/hello")
            .header(header::ORIGIN, "https://site.example")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::ALLOW], "GET,HEAD,OPTIONS");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://site.example");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET,HEAD,OPTIONS");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Origin,Accept,Content-Type,Content-Length,X-Requested-With,Key,Token,Authorization"
        );
    }

    #[tokio::test]
    async fn disallowed_method_is_forbidden() {
        let request = axum::http::Request::post("/api/hello").body(Body::empty()).unwrap();
        let (status, _, _) = call(request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn cors_origin_is_echoed() {
        let request = axum::http::Request::get("/api/hello")
            .header(header::ORIGIN, "https://site.example")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = call(request).await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://site.example");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn urlencoded_body_merges_with_query() {
        let request = axum::http::Request::post("/api/form?k=1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("k=2"))
            .unwrap();
        let (status, _, body) = call(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "1,2");
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let request = axum::http::Request::post("/api/form")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(vec![b'a'; 64]))
            .unwrap();
        let (status, _, _) = call(request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn silent_handler_yields_empty_ok() {
        let (status, _, body) = call(get("/api/silent")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn trace_echoes_request() {
        let request = axum::http::Request::builder()
            .method(Method::TRACE)
            .uri("/anywhere?x=1")
            .header("x-probe", "yes")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = call(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "message/http");
        assert_eq!(body, "TRACE /anywhere?x=1 HTTP/1.1\r\nx-probe: yes\r\n");
    }
}
