//! harenet demo server.
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::server ──▶ http::dispatcher ──▶ AppRouter
//!                                                        │                  ├─ /files/*  static files (ranges, 304)
//!                                                        │                  └─ /params   parameters as JSON
//!                                                        └─ upgrade /ws/echo/{ident} ──▶ EchoEndpoint
//! ```

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use harenet::config::{load_config, HareConfig};
use harenet::lifecycle::ServerGroup;
use harenet::observability::{logging, metrics};
use harenet::routing::{sync_action_fn, AppRouter};
use harenet::websocket::endpoint::endpoint_factory;
use harenet::websocket::{WebSocketEndpoint, WebSocketSession};

#[derive(Parser)]
#[command(name = "harenet")]
#[command(about = "HTTP/WebSocket demo server", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory served under /files.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

/// Echoes every text frame, prefixed with the bound ident.
struct EchoEndpoint {
    session: WebSocketSession,
}

impl WebSocketEndpoint for EchoEndpoint {
    fn on_open(&mut self) {
        tracing::info!(
            ident = self.session.param("ident").unwrap_or_default(),
            "echo session opened"
        );
    }

    fn on_text(&mut self, text: &str) {
        let ident = self.session.param("ident").unwrap_or_default();
        if let Err(e) = self.session.send_text(format!("{ident}: {text}")) {
            tracing::debug!(error = %e, "echo reply dropped");
        }
    }

    fn on_binary(&mut self, data: &[u8]) {
        let _ = self.session.send_binary(data.to_vec());
    }

    fn on_close(&mut self) {
        tracing::info!(sub_path = %self.session.sub_path(), "echo session closed");
    }
}

fn demo_app(context_path: &str, root: PathBuf) -> AppRouter {
    AppRouter::new(context_path)
        .files("/files", root, false)
        .route(
            "/params",
            sync_action_fn(&[Method::GET, Method::POST], |ctx| {
                let params: serde_json::Map<_, _> = ctx
                    .params()
                    .iter()
                    .map(|(k, v)| (k.to_string(), json!(v)))
                    .collect();
                let files: Vec<_> = ctx
                    .files()
                    .iter()
                    .map(|f| json!({ "field": f.field_name, "filename": f.filename, "mime": f.mime }))
                    .collect();
                let body = json!({
                    "remote": ctx.remote_address(),
                    "params": params,
                    "files": files,
                });
                let mut headers = HeaderMap::new();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                if let Err(e) = ctx.send(StatusCode::OK, headers, body.to_string()) {
                    tracing::warn!(error = %e, "params response not sent");
                }
            }),
        )
        .websocket("/ws", "echo/{ident}", endpoint_factory(|session| EchoEndpoint { session }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HareConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(servers = config.servers.len(), "harenet v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut group = ServerGroup::new();
    for server in config.servers {
        let app = demo_app(&server.http.context_path, cli.root.clone());
        group.add(server, Arc::new(app));
    }
    group.run_until_signal().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
