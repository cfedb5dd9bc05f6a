//! Endpoint capability trait and the per-connection session handle.

use axum::extract::ws::Message;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::net::connection::ConnectionId;

/// Faults reported to an endpoint.
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("websocket session is closed")]
    SessionClosed,

    #[error("websocket send queue is full")]
    QueueFull,

    #[error("websocket transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error("endpoint callback panicked: {0}")]
    EndpointPanicked(String),
}

/// Callbacks of one bound connection.
///
/// `on_open`, `on_text` and `on_close` are required; the rest default to
/// doing nothing.
pub trait WebSocketEndpoint: Send {
    fn on_open(&mut self);

    fn on_text(&mut self, text: &str);

    fn on_binary(&mut self, _data: &[u8]) {}

    fn on_pong(&mut self, _data: &[u8]) {}

    fn on_close(&mut self);

    /// Best effort; the connection is closed right after.
    fn on_error(&mut self, _error: &WebSocketError) {}
}

/// Builds the endpoint for a freshly bound connection.
pub type EndpointFactory = Arc<dyn Fn(WebSocketSession) -> Box<dyn WebSocketEndpoint> + Send + Sync>;

/// Wrap a closure as an [`EndpointFactory`].
pub fn endpoint_factory<F, E>(f: F) -> EndpointFactory
where
    F: Fn(WebSocketSession) -> E + Send + Sync + 'static,
    E: WebSocketEndpoint + 'static,
{
    Arc::new(move |session| Box::new(f(session)) as Box<dyn WebSocketEndpoint>)
}

/// Handle an endpoint uses to talk back to its client.
///
/// Cheap to clone; every clone writes to the same connection.
#[derive(Debug, Clone)]
pub struct WebSocketSession {
    id: ConnectionId,
    sender: mpsc::Sender<Message>,
    params: Arc<Vec<(String, String)>>,
    sub_path: Arc<str>,
}

impl WebSocketSession {
    pub(crate) fn new(
        sender: mpsc::Sender<Message>,
        params: Vec<(String, String)>,
        sub_path: &str,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
            params: Arc::new(params),
            sub_path: Arc::from(sub_path),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Query and path parameters resolved at bind time.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Request path below the mount prefix.
    pub fn sub_path(&self) -> &str {
        &self.sub_path
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), WebSocketError> {
        self.send(Message::Text(text.into().into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send(Message::Binary(data.into()))
    }

    pub fn send_ping(&self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send(Message::Ping(data.into()))
    }

    pub fn send_pong(&self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send(Message::Pong(data.into()))
    }

    /// Ask the connection to close after queued messages are written.
    pub fn close(&self) -> Result<(), WebSocketError> {
        self.send(Message::Close(None))
    }

    /// Queue without waiting; a client that reads too slowly yields
    /// `QueueFull` instead of unbounded buffering.
    fn send(&self, message: Message) -> Result<(), WebSocketError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => WebSocketError::QueueFull,
            TrySendError::Closed(_) => WebSocketError::SessionClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_queues_frames_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = WebSocketSession::new(tx, vec![("ident".into(), "7".into())], "dev/7");
        assert_eq!(session.param("ident"), Some("7"));
        assert_eq!(session.param("missing"), None);
        assert_eq!(session.sub_path(), "dev/7");

        session.send_text("hi").unwrap();
        session.send_binary(vec![1u8, 2]).unwrap();
        session.send_ping(Bytes::from_static(b"p")).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), Message::Text(t) if t.as_str() == "hi"));
        assert!(matches!(rx.try_recv().unwrap(), Message::Binary(b) if b[..] == [1, 2]));
        assert!(matches!(rx.try_recv().unwrap(), Message::Ping(_)));
    }

    #[test]
    fn send_after_close_fails() {
        let (tx, rx) = mpsc::channel(8);
        let session = WebSocketSession::new(tx, vec![], "");
        drop(rx);
        assert!(matches!(session.send_text("late"), Err(WebSocketError::SessionClosed)));
    }

    #[test]
    fn full_queue_rejects_instead_of_growing() {
        let (tx, mut rx) = mpsc::channel(2);
        let session = WebSocketSession::new(tx, vec![], "");
        session.send_text("a").unwrap();
        session.send_text("b").unwrap();
        assert!(matches!(session.send_text("c"), Err(WebSocketError::QueueFull)));

        rx.try_recv().unwrap();
        session.send_text("c").unwrap();
    }
}
