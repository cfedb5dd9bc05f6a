//! Per-listener HTTP server.
//!
//! # Responsibilities
//! - Accept connections from a bounded listener
//! - Serve each connection with hyper (HTTP/1.1 with upgrades, HTTP/2)
//! - Enforce the header read timeout
//! - On shutdown: stop accepting, drain open connections, tear the app down

use axum::{extract::ConnectInfo, Router};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tower::Service;

use crate::config::ServerConfig;
use crate::http::dispatcher;
use crate::net::connection::{ConnectionScope, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError};
use crate::routing::HttpApp;

/// Failure to run a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One listening server hosting one application.
pub struct HttpServer {
    router: Router,
    config: Arc<ServerConfig>,
    app: Arc<dyn HttpApp>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, app: Arc<dyn HttpApp>) -> Self {
        let config = Arc::new(config);
        let router = dispatcher::router(app.clone(), config.clone());
        Self { router, config, app }
    }

    /// The axum service requests are dispatched through.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            context_path = %self.app.context_path(),
            "HTTP server starting"
        );

        let tracker = ConnectionTracker::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let scope = ConnectionScope::new(permit, tracker.track(), stop_rx.clone());
                        self.spawn_connection(stream, peer, scope);
                    }
                    Err(ListenerError::LimitClosed) => break,
                    Err(e) => {
                        // usually fd exhaustion; back off instead of spinning
                        tracing::warn!(address = %addr, error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown.recv() => break,
            }
        }

        drop(listener);
        tracing::info!(
            address = %addr,
            open_connections = tracker.active_count(),
            "HTTP server draining"
        );
        // open WebSocket sessions watch the same signal
        let _ = stop_tx.send(true);
        let drain = self.config.http.drain_timeout();
        if tokio::time::timeout(drain, tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                address = %addr,
                open_connections = tracker.active_count(),
                "drain timed out, abandoning open connections"
            );
        }

        self.app.destroy();
        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    /// Serve one connection. Upgraded WebSocket sessions take a clone of
    /// `scope`, so the slot stays held until they close too.
    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, scope: ConnectionScope) {
        let router = self.router.clone();
        let header_timeout = self.config.http.header_read_timeout();

        tokio::spawn(async move {
            let connection_id = scope.id();
            let stop = scope.clone();

            let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                request.extensions_mut().insert(scope.clone());
                router.clone().call(request)
            });

            let mut builder = auto::Builder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(header_timeout);
            let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = stop.stopped() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };

            if let Err(e) = result {
                if is_quiet_error(e.as_ref()) {
                    tracing::debug!(%connection_id, peer_addr = %peer, error = %e, "connection closed");
                } else {
                    tracing::warn!(%connection_id, peer_addr = %peer, error = %e, "connection error");
                }
            }
        });
    }
}

/// Timeouts and half-sent requests close the connection silently.
fn is_quiet_error(error: &(dyn std::error::Error + 'static)) -> bool {
    match error.downcast_ref::<hyper::Error>() {
        Some(e) => e.is_timeout() || e.is_incomplete_message() || e.is_canceled(),
        None => error
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::BrokenPipe
                )
            }),
    }
}
