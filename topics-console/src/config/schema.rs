//! Configuration schema structs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Agent server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface the agent listener binds to
    pub bind: String,
    pub port: u16,
    /// Upper bound on joining server tasks at shutdown
    pub shutdown_timeout_ms: u64,
    /// Ask the attached process to exit when the console shuts down
    pub close_on_detach: bool,
    /// Largest accepted frame in bytes
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 5000,
            shutdown_timeout_ms: 3000,
            close_on_detach: false,
            max_frame_size: topics_protocol::MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Debug session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Captured stack snapshots and return values kept per session
    pub history_limit: usize,
    /// Lines shown on each side of a breakpoint
    pub context_radius: u32,
    /// Source roots indexed at startup
    pub source_paths: Vec<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: 64,
            context_radius: 3,
            source_paths: Vec::new(),
        }
    }
}

/// Log settings; `TOPICS_LOG` still wins over `filter`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    /// "stderr", "file" or "both"
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            output: "file".into(),
        }
    }
}
