//! Agent-side reactions to console requests

use tokio::sync::mpsc;

use topics_protocol::{Direction, LocalVar, Message};
use topics_utils::{Result, TopicsError};

/// Clonable path back to the console
///
/// Report methods never block, so instrumented application threads can call
/// them while suspended; they return `false` when the report was dropped.
#[derive(Clone)]
pub struct ConsoleSender {
    tx: mpsc::Sender<Message>,
}

impl ConsoleSender {
    pub(crate) fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Queue an agent message, waiting for room
    pub async fn send(&self, msg: Message) -> Result<()> {
        if msg.kind().direction() != Direction::Inbound {
            return Err(TopicsError::protocol(format!(
                "{} is only sent by the console",
                msg.kind()
            )));
        }
        self.tx
            .send(msg)
            .await
            .map_err(|_| TopicsError::ConnectionClosed)
    }

    /// Whether the connection task has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn report_breakpoint_hit(
        &self,
        breakpoint_id: i32,
        location: (&str, i32),
        thread: (i64, &str),
        frames: Vec<String>,
        locals: Vec<LocalVar>,
    ) -> bool {
        self.offer(Message::BreakpointHit {
            breakpoint_id,
            class_name: location.0.to_string(),
            line: location.1,
            thread_id: thread.0,
            thread_name: thread.1.to_string(),
            frames,
            locals,
        })
    }

    pub fn report_method_return(&self, location: &str, value: &str) -> bool {
        self.offer(Message::MethodReturn {
            location: location.to_string(),
            value: value.to_string(),
        })
    }

    /// Answer a `RequestMethodInstrumentation` with the defining class file
    pub fn report_class_bytes(
        &self,
        class_bytes: Vec<u8>,
        method_name: &str,
        descriptor: &str,
    ) -> bool {
        self.offer(Message::MethodInstrumentationResponse {
            class_bytes,
            method_name: method_name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    fn offer(&self, msg: Message) -> bool {
        let kind = msg.kind();
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(%kind, "report dropped: {}", e);
                false
            }
        }
    }
}

/// What the agent does when the console asks for something
///
/// Every hook defaults to doing nothing, so an agent only implements the
/// requests it supports.
pub trait ConsoleHandler: Send {
    fn set_breakpoint(
        &mut self,
        _breakpoint_id: i32,
        _class_name: &str,
        _line: i32,
        _console: &ConsoleSender,
    ) {
    }

    fn clear_breakpoint(&mut self, _breakpoint_id: i32) {}

    fn resume(&mut self, _thread_id: i64) {}

    fn instrument(
        &mut self,
        _class_name: &str,
        _method_name: &str,
        _descriptor: &str,
        _console: &ConsoleSender,
    ) {
    }

    /// The console wants the target process gone
    fn exit(&mut self, _exit_code: i32, _message: &str) {}

    /// The console already serves another agent
    fn rejected(&mut self) {}

    fn disconnected(&mut self) {}

    /// Route one console message to the hooks above
    fn handle(&mut self, msg: Message, console: &ConsoleSender) {
        match msg {
            Message::SetBreakpoint {
                breakpoint_id,
                class_name,
                line,
            } => self.set_breakpoint(breakpoint_id, &class_name, line, console),
            Message::ClearBreakpoint { breakpoint_id } => self.clear_breakpoint(breakpoint_id),
            Message::Resume { thread_id } => self.resume(thread_id),
            Message::RequestMethodInstrumentation {
                class_name,
                method_name,
                descriptor,
            } => self.instrument(&class_name, &method_name, &descriptor, console),
            Message::Exit { exit_code, message } => self.exit(exit_code, &message),
            Message::Busy => self.rejected(),
            other => tracing::warn!(kind = %other.kind(), "agent message echoed back by console"),
        }
    }
}

/// Takes every console message as-is
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: FnMut(Message, &ConsoleSender) + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ConsoleHandler for FnHandler<F>
where
    F: FnMut(Message, &ConsoleSender) + Send,
{
    fn handle(&mut self, msg: Message, console: &ConsoleSender) {
        (self.0)(msg, console)
    }
}
