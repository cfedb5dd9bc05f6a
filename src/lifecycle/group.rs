//! Multi-server lifecycle: start in order, stop together, wait for all.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::http::server::{HttpServer, ServerError};
use crate::lifecycle::{shutdown::Shutdown, signals};
use crate::net::listener::Listener;
use crate::routing::HttpApp;

/// A fixed list of independently configured servers.
pub struct ServerGroup {
    pending: Vec<(ServerConfig, Arc<dyn HttpApp>)>,
    running: Vec<JoinHandle<Result<(), ServerError>>>,
    local_addrs: Vec<SocketAddr>,
    shutdown: Shutdown,
}

impl Default for ServerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerGroup {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            running: Vec::new(),
            local_addrs: Vec::new(),
            shutdown: Shutdown::new(),
        }
    }

    pub fn add(&mut self, config: ServerConfig, app: Arc<dyn HttpApp>) -> &mut Self {
        self.pending.push((config, app));
        self
    }

    /// Bind and start every added server, in order.
    ///
    /// On a bind failure the servers already started are stopped and the
    /// error is returned.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        for (config, app) in std::mem::take(&mut self.pending) {
            let listener = match Listener::bind(&config.listener).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(
                        address = %config.listener.bind_address,
                        error = %e,
                        "server failed to start, stopping the group"
                    );
                    self.stop();
                    return Err(e.into());
                }
            };
            self.local_addrs.push(listener.local_addr()?);
            let server = HttpServer::new(config, app);
            let shutdown = self.shutdown.subscribe();
            self.running
                .push(tokio::spawn(async move { server.run(listener, shutdown).await }));
        }
        Ok(())
    }

    /// Addresses of started servers, in start order.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// A handle that stops the group when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Ask every running server to stop.
    pub fn stop(&self) {
        tracing::info!(servers = self.running.len(), "stopping servers");
        self.shutdown.trigger();
    }

    /// Wait until every server has closed; the first failure is returned
    /// after all have finished.
    pub async fn wait_close(&mut self) -> Result<(), ServerError> {
        let mut first_error = None;
        for handle in self.running.drain(..) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ServerError::Task(e)),
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited with error");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Start, stop on SIGINT/SIGTERM, and wait for every server to close.
    pub async fn run_until_signal(mut self) -> Result<(), ServerError> {
        self.start().await?;
        let shutdown = self.shutdown_handle();
        tokio::spawn(async move {
            signals::shutdown_signal().await;
            shutdown.trigger();
        });
        self.wait_close().await
    }
}
