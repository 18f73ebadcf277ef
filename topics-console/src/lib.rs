//! topics-console: the debugger side of the agent protocol
//!
//! Hosts the [`AgentServer`] the in-process agent connects to, the shared
//! debug [`Session`] and the operator [`Console`].

pub mod cli;
pub mod collab;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod server;
pub mod session;
pub mod spawn;
pub mod waker;

pub use collab::{AgentBreakpointSink, AgentLink, BreakpointSink, Outbound, SourceResolver};
pub use console::{Console, Reply};
pub use dispatch::{InboundHandler, SessionDispatcher};
pub use server::{AgentServer, ConnectionState, ServerOptions};
pub use session::{
    BreakpointEvent, BreakpointHandle, MethodReturn, Session, SessionStateError, SourceIndex,
    ThreadRef,
};
pub use waker::DuplexWaker;
