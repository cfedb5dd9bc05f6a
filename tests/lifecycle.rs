//! Server group start/stop behavior.

use axum::http::Method;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use harenet::config::ServerConfig;
use harenet::lifecycle::ServerGroup;
use harenet::routing::{AppRouter, HttpApp, RouteMatch};
use harenet::websocket::WebSocketRoutes;

mod common;

/// Wraps the test app and records teardown.
struct Tracked {
    inner: AppRouter,
    destroyed: Arc<AtomicBool>,
}

impl HttpApp for Tracked {
    fn context_path(&self) -> &str {
        self.inner.context_path()
    }

    fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.inner.resolve(method, path)
    }

    fn websocket_routes(&self) -> &WebSocketRoutes {
        self.inner.websocket_routes()
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_graceful_stop_destroys_app() {
    let dir = tempfile::tempdir().unwrap();
    let destroyed = Arc::new(AtomicBool::new(false));
    let app = Tracked {
        inner: common::test_app(dir.path(), common::counter()),
        destroyed: destroyed.clone(),
    };
    let (mut group, addr) = common::start(Arc::new(app)).await;

    let resp = reqwest::get(format!("http://{addr}/app/params?x=1")).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "x=1");

    group.stop();
    tokio::time::timeout(Duration::from_secs(10), group.wait_close())
        .await
        .expect("group closes within drain timeout")
        .unwrap();
    assert!(destroyed.load(Ordering::SeqCst));

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_bind_failure_stops_started_servers() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = occupied.local_addr().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut first = ServerConfig::default();
    first.listener.bind_address = "127.0.0.1:0".into();
    let mut second = ServerConfig::default();
    second.listener.bind_address = taken.to_string();

    let mut group = ServerGroup::new();
    group
        .add(first, Arc::new(common::test_app(dir.path(), common::counter())))
        .add(second, Arc::new(common::test_app(dir.path(), common::counter())));

    assert!(group.start().await.is_err());
    let started = group.local_addrs()[0];
    tokio::time::timeout(Duration::from_secs(10), group.wait_close())
        .await
        .unwrap()
        .unwrap();
    assert!(tokio::net::TcpStream::connect(started).await.is_err());
}
