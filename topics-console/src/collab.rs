//! Seams between the operator commands and the rest of the console

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tracing::debug;

use topics_protocol::Message;
use topics_utils::Result;

use crate::server::{AgentServer, ConnectionState};
use crate::session::{BreakpointHandle, Session, SourceIndex};

/// Anything that can queue a message for the agent
pub trait Outbound: Send + Sync {
    fn write(&self, message: Message) -> Result<()>;
}

/// Connection control used by `status` and `detach`
pub trait AgentLink: Outbound {
    fn state(&self) -> ConnectionState;

    /// Address of the attached agent
    fn peer(&self) -> Option<SocketAddr>;

    fn detach(&self) -> Result<()>;
}

impl AgentLink for AgentServer {
    fn state(&self) -> ConnectionState {
        AgentServer::state(self)
    }

    fn peer(&self) -> Option<SocketAddr> {
        AgentServer::peer(self)
    }

    fn detach(&self) -> Result<()> {
        AgentServer::detach(self)
    }
}

/// Installs and removes breakpoints in the target
pub trait BreakpointSink: Send + Sync {
    fn set_breakpoint(&self, class_name: &str, line: i32) -> Result<BreakpointHandle>;

    fn disable(&self, handle: &BreakpointHandle) -> Result<()>;
}

/// Finds the source file for a class
pub trait SourceResolver {
    fn map_class_to_file(&self, class_name: &str) -> Option<PathBuf>;
}

impl SourceResolver for SourceIndex {
    fn map_class_to_file(&self, class_name: &str) -> Option<PathBuf> {
        self.get(class_name).map(Path::to_path_buf)
    }
}

impl SourceResolver for Session {
    fn map_class_to_file(&self, class_name: &str) -> Option<PathBuf> {
        self.source_file(class_name)
    }
}

/// Breakpoint sink that asks the agent over the wire
pub struct AgentBreakpointSink {
    outbound: Arc<dyn Outbound>,
    next_id: AtomicI32,
}

impl AgentBreakpointSink {
    pub fn new(outbound: Arc<dyn Outbound>) -> Self {
        Self {
            outbound,
            next_id: AtomicI32::new(1),
        }
    }
}

impl BreakpointSink for AgentBreakpointSink {
    fn set_breakpoint(&self, class_name: &str, line: i32) -> Result<BreakpointHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.outbound.write(Message::SetBreakpoint {
            breakpoint_id: id,
            class_name: class_name.to_string(),
            line,
        })?;

        debug!(id, class_name, line, "requested breakpoint");
        Ok(BreakpointHandle {
            id,
            class_name: class_name.to_string(),
            line,
        })
    }

    fn disable(&self, handle: &BreakpointHandle) -> Result<()> {
        self.outbound.write(Message::ClearBreakpoint {
            breakpoint_id: handle.id,
        })
    }
}
