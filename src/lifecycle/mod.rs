//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (group.rs):
//!     bind every configured server in order → spawn accept loops
//!
//! Stop (shutdown.rs):
//!     trigger → servers stop accepting → drain → HttpApp::destroy
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger
//! ```
//!
//! # Design Decisions
//! - Ordered startup; a bind failure stops the servers already started
//! - Drain has a deadline per server

pub mod group;
pub mod shutdown;
pub mod signals;

pub use group::ServerGroup;
pub use shutdown::Shutdown;
