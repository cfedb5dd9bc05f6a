//! WebSocket endpoint routing.
//!
//! # Data Flow
//! ```text
//! Upgrade request under a mount prefix
//!     → table.rs (strip prefix, first matching pattern, merge parameters)
//!     → handshake
//!     → connection.rs (Unbound → Bound: factory builds the endpoint)
//!         text / binary / pong frames → endpoint callbacks
//!         transport fault             → on_error, then close
//!         close                       → on_close exactly once (Bound → Closed)
//! ```
//!
//! # Design Decisions
//! - One endpoint instance per connection, created by a factory closure
//! - The route table is built before the server starts and never mutated after
//! - Writes go through a bounded channel drained by a writer task, so
//!   callbacks never await the socket

pub mod connection;
pub mod endpoint;
pub mod table;

pub use connection::{ConnectionPhase, WebSocketConnection};
pub use endpoint::{EndpointFactory, WebSocketEndpoint, WebSocketError, WebSocketSession};
pub use table::{Binding, WebSocketRoutes};
