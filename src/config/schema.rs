//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration: every listening server plus process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HareConfig {
    /// Independently configured servers, started in order.
    pub servers: Vec<ServerConfig>,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

impl Default for HareConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerConfig::default()],
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Settings of one listening server.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Request handling.
    pub http: HttpConfig,

    /// Multipart upload handling.
    pub uploads: UploadConfig,

    /// File responses.
    pub files: FileConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Request handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Path prefix every routed request must start with.
    pub context_path: String,

    /// Largest request body that is aggregated, in bytes.
    pub max_content_size: usize,

    /// Time allowed for a request head to arrive, in seconds.
    pub header_read_timeout_secs: u64,

    /// How long a stopping server waits for open connections, in seconds.
    pub drain_timeout_secs: u64,
}

impl HttpConfig {
    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_secs(self.header_read_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            context_path: "/".to_string(),
            max_content_size: 100 * 1024 * 1024,
            header_read_timeout_secs: 30,
            drain_timeout_secs: 10,
        }
    }
}

/// Multipart upload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Parts larger than this spill to disk while decoding, in bytes.
    pub memory_threshold: usize,

    /// Directory for upload and spill files (system temp dir if unset).
    pub temp_dir: Option<PathBuf>,
}

impl UploadConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            memory_threshold: 1024 * 1024,
            temp_dir: None,
        }
    }
}

/// File response configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    /// `Cache-Control: max-age` for files, in seconds.
    pub cache_max_age_secs: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            // six 30-day months
            cache_max_age_secs: 3600 * 24 * 30 * 6,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
