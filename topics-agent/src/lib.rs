//! topics-agent: the in-process side of the topics protocol
//!
//! The agent connects to a waiting console, announces its pid with `Init`
//! and then exchanges messages until either side closes the socket.

pub mod connection;

pub use connection::{
    AgentConnection, ConnectionState, ConsoleHandler, ConsoleSender, FnHandler,
};

use topics_utils::{LogConfig, Result};

/// Default console address
pub const DEFAULT_CONSOLE_ADDR: &str = "127.0.0.1:5000";

/// Install the agent's log subscriber (stderr, `warn` unless `TOPICS_LOG` says otherwise)
pub fn init_logging() -> Result<()> {
    topics_utils::init_logging_with_config(LogConfig::agent())
}
