//! Shared utilities for integration tests.

use axum::http::{HeaderMap, Method, StatusCode};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use harenet::config::ServerConfig;
use harenet::lifecycle::ServerGroup;
use harenet::routing::{sync_action_fn, AppRouter, HttpApp};
use harenet::websocket::endpoint::endpoint_factory;
use harenet::websocket::{WebSocketEndpoint, WebSocketSession};

/// Replies to every text frame with `<ident>:<text>`.
pub struct Echo {
    session: WebSocketSession,
}

impl WebSocketEndpoint for Echo {
    fn on_open(&mut self) {}

    fn on_text(&mut self, text: &str) {
        let ident = self.session.param("ident").unwrap_or("-");
        let _ = self.session.send_text(format!("{ident}:{text}"));
    }

    fn on_close(&mut self) {}
}

/// Test application: files under `/app/files`, parameters echoed on
/// `/app/params`, echo WebSocket at `/ws/dev/{ident}`.
///
/// `built` counts endpoint constructions.
pub fn test_app(root: &Path, built: Arc<AtomicUsize>) -> AppRouter {
    AppRouter::new("/app")
        .files("/files", root, false)
        .route(
            "/params",
            sync_action_fn(&[Method::GET, Method::POST], |ctx| {
                let mut lines: Vec<String> = ctx
                    .params()
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.join(",")))
                    .collect();
                for file in ctx.files() {
                    let content = std::fs::read_to_string(&file.path).unwrap_or_default();
                    lines.push(format!("file {}:{}:{content}", file.field_name, file.filename));
                    let _ = std::fs::remove_file(&file.path);
                }
                lines.sort();
                let _ = ctx.send(StatusCode::OK, HeaderMap::new(), lines.join("\n"));
            }),
        )
        .websocket(
            "/ws",
            "dev/{ident}",
            endpoint_factory(move |session| {
                built.fetch_add(1, Ordering::SeqCst);
                Echo { session }
            }),
        )
}

/// Start a one-server group on an ephemeral loopback port.
pub async fn start(app: Arc<dyn HttpApp>) -> (ServerGroup, SocketAddr) {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.http.drain_timeout_secs = 2;

    let mut group = ServerGroup::new();
    group.add(config, app);
    group.start().await.expect("server starts");
    let addr = group.local_addrs()[0];
    (group, addr)
}

#[allow(dead_code)]
pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}
