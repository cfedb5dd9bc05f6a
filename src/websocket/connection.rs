//! Per-connection endpoint state machine and frame pump.
//!
//! # Connection States
//! ```text
//! Unbound ──bind──→ Bound ──close / fault──→ Closed
//!    └───────────── no binding: close frame, no endpoint ever built
//! ```
//!
//! # Design Decisions
//! - The state machine is plain data driven by `serve`, so it is usable
//!   without a socket
//! - Every endpoint callback runs under `catch_unwind`; a panic counts as a
//!   fault of the connection
//! - `on_close` runs exactly once, whatever ends the connection
//! - A stopping server closes its open sessions; the session holds the
//!   connection's slot until then

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::net::connection::ConnectionScope;
use crate::observability::metrics;
use crate::websocket::endpoint::{WebSocketEndpoint, WebSocketError, WebSocketSession};
use crate::websocket::table::Binding;

/// Frames an endpoint may queue ahead of the client.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Time queued frames get to flush once the connection is closing.
const FLUSH_DEADLINE: Duration = Duration::from_secs(5);

/// Observable phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Unbound,
    Bound,
    Closed,
}

enum State {
    Unbound,
    Bound {
        endpoint: Box<dyn WebSocketEndpoint>,
        session: WebSocketSession,
    },
    Closed,
}

/// Whether the frame pump keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Application-level state of one WebSocket connection.
pub struct WebSocketConnection {
    state: State,
}

impl Default for WebSocketConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnection {
    pub fn new() -> Self {
        Self {
            state: State::Unbound,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        match self.state {
            State::Unbound => ConnectionPhase::Unbound,
            State::Bound { .. } => ConnectionPhase::Bound,
            State::Closed => ConnectionPhase::Closed,
        }
    }

    pub fn session(&self) -> Option<&WebSocketSession> {
        match &self.state {
            State::Bound { session, .. } => Some(session),
            _ => None,
        }
    }

    /// Build the endpoint and open it. Only an unbound connection binds.
    pub fn bind(&mut self, binding: &Binding, sender: mpsc::Sender<Message>) -> Flow {
        if !matches!(self.state, State::Unbound) {
            tracing::warn!(pattern = %binding.pattern, "connection already bound, not rebinding");
            return Flow::Continue;
        }
        let session = WebSocketSession::new(sender, binding.params.clone(), &binding.sub_path);
        let factory = binding.factory.clone();
        let created = {
            let session = session.clone();
            guarded(move || factory(session))
        };
        let endpoint = match created {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!(pattern = %binding.pattern, error = %e, "endpoint construction failed");
                self.state = State::Closed;
                return Flow::Close;
            }
        };

        tracing::debug!(
            connection_id = %session.id(),
            pattern = %binding.pattern,
            sub_path = %binding.sub_path,
            "WebSocket bound"
        );
        metrics::websocket_opened();
        self.state = State::Bound { endpoint, session };
        self.invoke(|endpoint| endpoint.on_open())
    }

    /// Route one received frame to the endpoint.
    pub fn on_frame(&mut self, message: Message) -> Flow {
        if !matches!(self.state, State::Bound { .. }) {
            return Flow::Close;
        }
        match message {
            Message::Text(text) => self.invoke(|endpoint| endpoint.on_text(text.as_str())),
            Message::Binary(data) => self.invoke(|endpoint| endpoint.on_binary(&data)),
            Message::Pong(data) => self.invoke(|endpoint| endpoint.on_pong(&data)),
            // answered by the transport
            Message::Ping(_) => Flow::Continue,
            Message::Close(_) => Flow::Close,
        }
    }

    /// Report a fault to the endpoint, then close.
    pub fn fail(&mut self, error: WebSocketError) {
        if let State::Bound { endpoint, session } = &mut self.state {
            tracing::warn!(connection_id = %session.id(), error = %error, "WebSocket fault");
            if let Err(e) = guarded(|| endpoint.on_error(&error)) {
                tracing::warn!(connection_id = %session.id(), error = %e, "on_error failed");
            }
        }
        self.close();
    }

    /// Transition to `Closed`, running `on_close` if the connection was bound.
    pub fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, State::Closed);
        if let State::Bound {
            mut endpoint,
            session,
        } = previous
        {
            if let Err(e) = guarded(|| endpoint.on_close()) {
                tracing::warn!(connection_id = %session.id(), error = %e, "on_close failed");
            }
            metrics::websocket_closed();
            tracing::debug!(connection_id = %session.id(), "WebSocket closed");
        }
    }

    fn invoke(&mut self, callback: impl FnOnce(&mut dyn WebSocketEndpoint)) -> Flow {
        let State::Bound { endpoint, .. } = &mut self.state else {
            return Flow::Close;
        };
        match guarded(|| callback(endpoint.as_mut())) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                self.fail(e);
                Flow::Close
            }
        }
    }
}

fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, WebSocketError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        WebSocketError::EndpointPanicked(message)
    })
}

/// Drive an upgraded socket until it closes.
///
/// Without a binding the socket is closed straight away and no endpoint is
/// constructed. When `scope` reports the server stopping, the session is
/// closed like a client close.
pub async fn serve(socket: WebSocket, binding: Option<Binding>, scope: ConnectionScope) {
    let (mut sink, mut stream) = socket.split();

    let Some(binding) = binding else {
        tracing::debug!("no endpoint for WebSocket sub-path, closing");
        let _ = sink.send(Message::Close(None)).await;
        return;
    };

    let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE_CAPACITY);
    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = sink.send(message).await {
                tracing::debug!(error = %e, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let mut connection = WebSocketConnection::new();
    if connection.bind(&binding, tx.clone()) == Flow::Continue {
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(message)) => {
                        if connection.on_frame(message) == Flow::Close {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        connection.fail(WebSocketError::Transport(e));
                        break;
                    }
                    None => break,
                },
                // the writer stops after an endpoint-requested close
                _ = tx.closed() => break,
                _ = scope.stopped() => {
                    tracing::debug!(connection_id = %scope.id(), "server stopping, closing WebSocket");
                    break;
                }
            }
        }
    }
    connection.close();

    if tx.try_send(Message::Close(None)).is_err() {
        tracing::debug!(connection_id = %scope.id(), "close frame not queued");
    }
    drop(tx);
    match tokio::time::timeout(FLUSH_DEADLINE, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "WebSocket writer task failed"),
        Err(_) => {
            writer.abort();
            tracing::debug!(connection_id = %scope.id(), "WebSocket flush deadline passed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::endpoint::endpoint_factory;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        log: Log,
        session: WebSocketSession,
    }

    impl WebSocketEndpoint for Recorder {
        fn on_open(&mut self) {
            let ident = self.session.param("ident").unwrap_or("-").to_string();
            self.log.lock().unwrap().push(format!("open {ident}"));
        }

        fn on_text(&mut self, text: &str) {
            if text == "boom" {
                panic!("bad frame");
            }
            self.log.lock().unwrap().push(format!("text {text}"));
            let _ = self.session.send_text(format!("echo {text}"));
        }

        fn on_binary(&mut self, data: &[u8]) {
            self.log.lock().unwrap().push(format!("binary {}", data.len()));
        }

        fn on_close(&mut self) {
            self.log.lock().unwrap().push("close".into());
        }

        fn on_error(&mut self, error: &WebSocketError) {
            self.log.lock().unwrap().push(format!("error {error}"));
        }
    }

    fn binding(log: &Log) -> Binding {
        let log = log.clone();
        Binding {
            pattern: "dev/{ident}".into(),
            factory: endpoint_factory(move |session| Recorder {
                log: log.clone(),
                session,
            }),
            params: vec![("ident".into(), "42".into())],
            sub_path: "dev/42".into(),
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn frames_reach_bound_endpoint() {
        let log = Log::default();
        let (tx, mut rx) = mpsc::channel(16);
        let mut conn = WebSocketConnection::new();
        assert_eq!(conn.phase(), ConnectionPhase::Unbound);

        assert_eq!(conn.bind(&binding(&log), tx), Flow::Continue);
        assert_eq!(conn.phase(), ConnectionPhase::Bound);
        assert_eq!(conn.session().unwrap().sub_path(), "dev/42");

        assert_eq!(conn.on_frame(Message::Text("hi".into())), Flow::Continue);
        assert_eq!(conn.on_frame(Message::Binary(vec![1, 2, 3].into())), Flow::Continue);
        assert_eq!(conn.on_frame(Message::Ping(Default::default())), Flow::Continue);
        assert_eq!(conn.on_frame(Message::Close(None)), Flow::Close);
        conn.close();
        conn.close();

        assert_eq!(conn.phase(), ConnectionPhase::Closed);
        assert_eq!(entries(&log), ["open 42", "text hi", "binary 3", "close"]);
        assert!(matches!(rx.try_recv().unwrap(), Message::Text(t) if t.as_str() == "echo hi"));
    }

    #[test]
    fn panicking_callback_reports_error_then_closes() {
        let log = Log::default();
        let (tx, _rx) = mpsc::channel(16);
        let mut conn = WebSocketConnection::new();
        conn.bind(&binding(&log), tx);

        assert_eq!(conn.on_frame(Message::Text("boom".into())), Flow::Close);
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
        assert_eq!(
            entries(&log),
            ["open 42", "error endpoint callback panicked: bad frame", "close"]
        );
    }

    #[test]
    fn bound_connection_is_never_rebound() {
        let log = Log::default();
        let (tx, _rx) = mpsc::channel(16);
        let mut conn = WebSocketConnection::new();
        conn.bind(&binding(&log), tx.clone());
        conn.bind(&binding(&log), tx);
        conn.close();
        assert_eq!(entries(&log), ["open 42", "close"]);
    }

    #[test]
    fn unbound_close_runs_nothing() {
        let mut conn = WebSocketConnection::new();
        conn.fail(WebSocketError::SessionClosed);
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
        assert_eq!(conn.on_frame(Message::Text("late".into())), Flow::Close);
    }
}
