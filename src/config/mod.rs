//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HareConfig (validated, immutable)
//!     → one ServerConfig per listening server, shared via Arc
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; route tables are fixed at startup too
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    FileConfig, HareConfig, HttpConfig, ListenerConfig, ObservabilityConfig, ServerConfig,
    UploadConfig,
};
