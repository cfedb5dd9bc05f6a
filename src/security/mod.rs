//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (aggregate the body within max_content_size)
//!     → headers.rs (CORS headers, client address)
//!     → Pass to the matched route action
//! ```
//!
//! # Design Decisions
//! - CORS echoes the request origin; there is no origin allow-list
//! - Oversized bodies are rejected before any parsing

pub mod headers;
pub mod limits;
