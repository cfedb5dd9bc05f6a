//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Detect servers competing for the same address
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HareConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::HareConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &HareConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut push = |field: String, message: &str| {
        errors.push(ValidationError {
            field,
            message: message.to_string(),
        })
    };

    if config.servers.is_empty() {
        push("servers".into(), "at least one server is required");
    }

    let mut addresses = HashSet::new();
    for (i, server) in config.servers.iter().enumerate() {
        let prefix = format!("servers[{i}]");
        match server.listener.bind_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if addr.port() != 0 && !addresses.insert(addr) {
                    push(format!("{prefix}.listener.bind_address"), "address used twice");
                }
            }
            Err(_) => push(
                format!("{prefix}.listener.bind_address"),
                "not a socket address",
            ),
        }
        if server.listener.max_connections == 0 {
            push(format!("{prefix}.listener.max_connections"), "must be > 0");
        }
        if server.http.max_content_size == 0 {
            push(format!("{prefix}.http.max_content_size"), "must be > 0");
        }
        if !server.http.context_path.starts_with('/') {
            push(format!("{prefix}.http.context_path"), "must start with '/'");
        }
        if server.files.cache_max_age_secs == 0 {
            push(format!("{prefix}.files.cache_max_age_secs"), "must be > 0");
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        push(
            "observability.metrics_address".into(),
            "not a socket address",
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServerConfig;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&HareConfig::default()), Ok(()));
    }

    #[test]
    fn duplicate_addresses_rejected() {
        let mut config = HareConfig::default();
        config.servers.push(ServerConfig::default());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "servers[1].listener.bind_address");
    }

    #[test]
    fn ephemeral_ports_may_repeat() {
        let mut config = HareConfig::default();
        config.servers[0].listener.bind_address = "127.0.0.1:0".into();
        config.servers.push(config.servers[0].clone());
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn empty_server_list_rejected() {
        let config = HareConfig {
            servers: Vec::new(),
            ..HareConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
