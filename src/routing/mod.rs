//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → HttpApp::resolve (router.rs)
//!     → Return: RouteMatch (route path + action) or None
//!
//! WebSocket sub-paths:
//!     → matcher.rs (`dev/{ident}` patterns, mount trimming)
//! ```
//!
//! # Design Decisions
//! - Routes are registered at startup, immutable at runtime
//! - Exact paths first, then the longest mount prefix
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use matcher::PathPattern;
pub use router::{action_fn, sync_action_fn, AppRouter, HttpApp, RouteAction, RouteMatch};
