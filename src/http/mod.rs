//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, header timeout, drain)
//!     → dispatcher.rs (TRACE, context path, route, OPTIONS/CORS, method policy)
//!     → context.rs (params.rs + multipart.rs unify query and body)
//!     → RouteAction
//!         → file.rs (conditional.rs + range.rs) when a file is sent
//!     → Send to client
//! ```

pub mod conditional;
pub mod context;
pub mod dispatcher;
pub mod file;
pub mod multipart;
pub mod params;
pub mod range;
pub mod server;

pub use context::{ContextError, HttpContext};
pub use file::{HttpFile, StaticFiles};
pub use params::{ParamMap, UploadedFile};
pub use server::{HttpServer, ServerError};
