//! Default configuration values
//!
//! These are embedded in the binary and used when no config file exists.

/// Default configuration as TOML, written out by `--init-config`
pub const DEFAULT_CONFIG_TOML: &str = r##"
# topics configuration

[server]
bind = "127.0.0.1"
port = 5000
shutdown_timeout_ms = 3000
close_on_detach = false
max_frame_size = 16777216

[session]
history_limit = 64
context_radius = 3
source_paths = []

[logging]
filter = "info"
output = "file"
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ConfigLoader};
    use std::path::Path;

    #[test]
    fn test_default_toml_matches_default_struct() {
        let parsed = ConfigLoader::parse(DEFAULT_CONFIG_TOML, Path::new("default.toml")).unwrap();
        let defaults = AppConfig::default();

        assert_eq!(parsed.server.port, defaults.server.port);
        assert_eq!(parsed.server.bind, defaults.server.bind);
        assert_eq!(parsed.server.max_frame_size, defaults.server.max_frame_size);
        assert_eq!(parsed.session.history_limit, defaults.session.history_limit);
        assert_eq!(parsed.session.context_radius, defaults.session.context_radius);
        assert_eq!(parsed.logging.output, defaults.logging.output);
    }
}
