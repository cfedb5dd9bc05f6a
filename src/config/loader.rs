//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::HareConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<HareConfig, ConfigError> {
    let config: HareConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<HareConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.servers[0].files.cache_max_age_secs, 15_552_000);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn multiple_servers() {
        let config = parse_config(
            r#"
            [observability]
            log_level = "debug"

            [[servers]]
            listener = { bind_address = "127.0.0.1:8080" }
            http = { context_path = "/app" }

            [[servers]]
            listener = { bind_address = "127.0.0.1:8081" }
            uploads = { memory_threshold = 4096, temp_dir = "/var/tmp" }
            "#,
        )
        .unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].http.context_path, "/app");
        assert_eq!(config.servers[0].http.max_content_size, 100 * 1024 * 1024);
        assert_eq!(config.servers[1].uploads.memory_threshold, 4096);
        assert_eq!(
            config.servers[1].uploads.temp_dir(),
            std::path::PathBuf::from("/var/tmp")
        );
    }

    #[test]
    fn invalid_config_reports_every_error() {
        let err = parse_config(
            r#"
            [[servers]]
            listener = { bind_address = "nowhere", max_connections = 0 }
            http = { context_path = "app" }
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn syntax_error_is_parse_error() {
        assert!(matches!(parse_config("[[servers]"), Err(ConfigError::Parse(_))));
    }
}
