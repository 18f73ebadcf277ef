//! Configuration loader

use std::path::Path;

use topics_utils::{config_file, ensure_dir, LogOutput, Result, TopicsError};

use super::{AppConfig, DEFAULT_CONFIG_TOML};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(TopicsError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| TopicsError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| TopicsError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.server.bind.trim().is_empty() {
            return Err(TopicsError::config("server.bind must not be empty"));
        }

        // Room for at least the message ID
        if config.server.max_frame_size < 4 {
            return Err(TopicsError::config("server.max_frame_size must be at least 4"));
        }

        if config.server.shutdown_timeout_ms == 0 {
            return Err(TopicsError::config(
                "server.shutdown_timeout_ms must be greater than 0",
            ));
        }

        if config.session.history_limit == 0 {
            return Err(TopicsError::config(
                "session.history_limit must be at least 1",
            ));
        }

        config.logging.output.parse::<LogOutput>()?;

        Ok(())
    }

    /// Load from `path` (or the default location) and validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<AppConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }

    /// Write the default configuration to `path` unless a file is already there.
    ///
    /// Returns `true` when a file was written.
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            ensure_dir(parent).map_err(|e| TopicsError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, DEFAULT_CONFIG_TOML.trim_start()).map_err(|e| {
            TopicsError::FileWrite {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            [server]
            port = 6000
            close_on_detach = true

            [session]
            source_paths = ["/src/main/java"]
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.server.port, 6000);
        assert!(config.server.close_on_detach);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.session.source_paths.len(), 1);
        assert_eq!(config.session.history_limit, 64);
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let dir = tempdir().unwrap();
        let result = ConfigLoader::load_from_path(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(TopicsError::ConfigNotFound(_))));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(matches!(result, Err(TopicsError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_parse_wrong_type() {
        let result = ConfigLoader::parse("[server]\nport = \"high\"", Path::new("test.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_defaults() {
        assert!(ConfigLoader::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_history() {
        let mut config = AppConfig::default();
        config.session.history_limit = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_tiny_frame_limit() {
        let mut config = AppConfig::default();
        config.server.max_frame_size = 2;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_unknown_log_output() {
        let mut config = AppConfig::default();
        config.logging.output = "syslog".into();
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_write_default_creates_parent_and_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(ConfigLoader::write_default(&path).unwrap());
        let config = ConfigLoader::load_and_validate(Some(&path)).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.logging.output, "file");
    }

    #[test]
    fn test_write_default_keeps_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 6001\n").unwrap();

        assert!(!ConfigLoader::write_default(&path).unwrap());
        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.server.port, 6001);
    }

    #[test]
    fn test_server_address() {
        let mut config = AppConfig::default();
        config.server.bind = "0.0.0.0".into();
        config.server.port = 7001;
        assert_eq!(config.server.address(), "0.0.0.0:7001");
    }
}
