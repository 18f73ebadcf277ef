//! Configuration for the topics console
//!
//! Read once at startup from `$XDG_CONFIG_HOME/topics/config.toml`;
//! command-line flags override individual fields.

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use schema::*;
