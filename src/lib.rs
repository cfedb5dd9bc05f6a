//! HTTP/WebSocket server core: range-aware file delivery, conditional
//! requests, unified request parameters and WebSocket endpoint routing.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;
pub mod websocket;

pub use config::schema::HareConfig;
pub use http::{HttpContext, HttpServer};
pub use lifecycle::{ServerGroup, Shutdown};
pub use routing::{AppRouter, HttpApp, RouteAction};
pub use websocket::{WebSocketEndpoint, WebSocketSession};
