//! Routing of inbound agent messages into the session

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use topics_protocol::Message;

use crate::session::{
    BreakpointEvent, InstrumentationRecord, MethodReturn, Session, ThreadRef,
};

/// Receives decoded agent messages in arrival order
///
/// Called from the duplex loop; implementations must not block.
pub trait InboundHandler: Send + Sync {
    fn handle(&self, message: Message);

    fn on_connected(&self, _peer: SocketAddr) {}

    fn on_disconnected(&self) {}
}

/// Applies agent messages to a [`Session`]
pub struct SessionDispatcher {
    session: Arc<Session>,
}

impl SessionDispatcher {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl InboundHandler for SessionDispatcher {
    fn handle(&self, message: Message) {
        match message {
            Message::Init { pid } => {
                self.session.set_pid(pid);
            }
            Message::BreakpointHit {
                breakpoint_id,
                class_name,
                line,
                thread_id,
                thread_name,
                frames,
                locals,
            } => {
                debug!(breakpoint_id, %class_name, line, thread_id, "breakpoint hit");
                self.session.record_breakpoint_hit(BreakpointEvent {
                    breakpoint_id,
                    class_name,
                    line,
                    thread: ThreadRef {
                        id: thread_id,
                        name: thread_name,
                    },
                    frames,
                    locals,
                });
            }
            Message::MethodReturn { location, value } => {
                self.session.record_return(MethodReturn { location, value });
            }
            Message::MethodInstrumentationResponse {
                class_bytes,
                method_name,
                descriptor,
            } => {
                info!(
                    bytes = class_bytes.len(),
                    %method_name,
                    %descriptor,
                    "received class bytes for instrumentation"
                );
                self.session.record_instrumentation(InstrumentationRecord {
                    class_len: class_bytes.len(),
                    method_name,
                    descriptor,
                });
            }
            other => {
                warn!(kind = %other.kind(), "ignoring unexpected message from agent");
            }
        }
    }

    fn on_connected(&self, peer: SocketAddr) {
        info!(%peer, "agent connected");
    }

    fn on_disconnected(&self) {
        info!("agent disconnected");
    }
}
