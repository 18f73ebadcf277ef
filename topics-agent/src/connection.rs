//! Agent-to-console connection management
//!
//! Provides the TCP connection to the topics console with automatic
//! message framing and async dispatch.

mod client;
mod handler;

pub use client::{AgentConnection, ConnectionState};
pub use handler::{ConsoleHandler, ConsoleSender, FnHandler};
