//! Message types exchanged between the console and the agent
//!
//! "Inbound" and "outbound" are named from the console's side: inbound
//! messages are sent by the agent running inside the target process.

use crate::codec::CodecError;
use crate::wire::{WireReader, WireWriter};

/// Which peer originates a message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Agent to console
    Inbound,
    /// Console to agent
    Outbound,
}

/// Discriminant of [`Message`], used as the registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Init,
    Busy,
    MethodInstrumentationResponse,
    RequestMethodInstrumentation,
    Exit,
    SetBreakpoint,
    ClearBreakpoint,
    BreakpointHit,
    Resume,
    MethodReturn,
}

/// Constructor used by the registry to build a message from its payload
pub type DecodeFn = fn(&mut WireReader<'_>) -> Result<Message, CodecError>;

impl MessageKind {
    /// Every kind, in no particular order
    pub const ALL: [MessageKind; 10] = [
        MessageKind::Init,
        MessageKind::Busy,
        MessageKind::MethodInstrumentationResponse,
        MessageKind::RequestMethodInstrumentation,
        MessageKind::Exit,
        MessageKind::SetBreakpoint,
        MessageKind::ClearBreakpoint,
        MessageKind::BreakpointHit,
        MessageKind::Resume,
        MessageKind::MethodReturn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Init => "Init",
            MessageKind::Busy => "Busy",
            MessageKind::MethodInstrumentationResponse => "MethodInstrumentationResponse",
            MessageKind::RequestMethodInstrumentation => "RequestMethodInstrumentation",
            MessageKind::Exit => "Exit",
            MessageKind::SetBreakpoint => "SetBreakpoint",
            MessageKind::ClearBreakpoint => "ClearBreakpoint",
            MessageKind::BreakpointHit => "BreakpointHit",
            MessageKind::Resume => "Resume",
            MessageKind::MethodReturn => "MethodReturn",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            MessageKind::Init
            | MessageKind::MethodInstrumentationResponse
            | MessageKind::BreakpointHit
            | MessageKind::MethodReturn => Direction::Inbound,
            MessageKind::Busy
            | MessageKind::RequestMethodInstrumentation
            | MessageKind::Exit
            | MessageKind::SetBreakpoint
            | MessageKind::ClearBreakpoint
            | MessageKind::Resume => Direction::Outbound,
        }
    }

    pub(crate) fn decoder(self) -> DecodeFn {
        match self {
            MessageKind::Init => decode_init,
            MessageKind::Busy => decode_busy,
            MessageKind::MethodInstrumentationResponse => decode_method_instrumentation_response,
            MessageKind::RequestMethodInstrumentation => decode_request_method_instrumentation,
            MessageKind::Exit => decode_exit,
            MessageKind::SetBreakpoint => decode_set_breakpoint,
            MessageKind::ClearBreakpoint => decode_clear_breakpoint,
            MessageKind::BreakpointHit => decode_breakpoint_hit,
            MessageKind::Resume => decode_resume,
            MessageKind::MethodReturn => decode_method_return,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A local variable visible in the suspended frame, rendered by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub name: String,
    pub value: String,
}

impl LocalVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// First message from a freshly connected agent
    Init { pid: i32 },

    /// Sent on a second connection while another agent is attached
    Busy,

    /// Class bytes for a method requested with `RequestMethodInstrumentation`
    MethodInstrumentationResponse {
        class_bytes: Vec<u8>,
        method_name: String,
        descriptor: String,
    },

    /// Ask the agent for the class defining a method
    RequestMethodInstrumentation {
        class_name: String,
        method_name: String,
        descriptor: String,
    },

    /// Ask the target process to exit
    Exit { exit_code: i32, message: String },

    /// Install a line breakpoint; the id is chosen by the console
    SetBreakpoint {
        breakpoint_id: i32,
        class_name: String,
        line: i32,
    },

    ClearBreakpoint { breakpoint_id: i32 },

    /// The target suspended a thread at a registered breakpoint
    BreakpointHit {
        breakpoint_id: i32,
        class_name: String,
        line: i32,
        thread_id: i64,
        thread_name: String,
        /// Rendered stack frames, innermost first
        frames: Vec<String>,
        /// Locals of the innermost frame
        locals: Vec<LocalVar>,
    },

    /// Resume a thread suspended at a breakpoint
    Resume { thread_id: i64 },

    /// A traced method returned
    MethodReturn { location: String, value: String },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Init { .. } => MessageKind::Init,
            Message::Busy => MessageKind::Busy,
            Message::MethodInstrumentationResponse { .. } => {
                MessageKind::MethodInstrumentationResponse
            }
            Message::RequestMethodInstrumentation { .. } => {
                MessageKind::RequestMethodInstrumentation
            }
            Message::Exit { .. } => MessageKind::Exit,
            Message::SetBreakpoint { .. } => MessageKind::SetBreakpoint,
            Message::ClearBreakpoint { .. } => MessageKind::ClearBreakpoint,
            Message::BreakpointHit { .. } => MessageKind::BreakpointHit,
            Message::Resume { .. } => MessageKind::Resume,
            Message::MethodReturn { .. } => MessageKind::MethodReturn,
        }
    }

    /// Write the payload fields (without the message ID)
    pub fn write_payload(&self, w: &mut WireWriter) {
        match self {
            Message::Init { pid } => w.write_i32(*pid),
            Message::Busy => {}
            Message::MethodInstrumentationResponse {
                class_bytes,
                method_name,
                descriptor,
            } => {
                w.write_blob(class_bytes);
                w.write_string(method_name);
                w.write_string(descriptor);
            }
            Message::RequestMethodInstrumentation {
                class_name,
                method_name,
                descriptor,
            } => {
                w.write_string(class_name);
                w.write_string(method_name);
                w.write_string(descriptor);
            }
            Message::Exit { exit_code, message } => {
                w.write_i32(*exit_code);
                w.write_string(message);
            }
            Message::SetBreakpoint {
                breakpoint_id,
                class_name,
                line,
            } => {
                w.write_i32(*breakpoint_id);
                w.write_string(class_name);
                w.write_i32(*line);
            }
            Message::ClearBreakpoint { breakpoint_id } => w.write_i32(*breakpoint_id),
            Message::BreakpointHit {
                breakpoint_id,
                class_name,
                line,
                thread_id,
                thread_name,
                frames,
                locals,
            } => {
                w.write_i32(*breakpoint_id);
                w.write_string(class_name);
                w.write_i32(*line);
                w.write_i64(*thread_id);
                w.write_string(thread_name);
                w.write_string_list(frames);
                write_locals(w, locals);
            }
            Message::Resume { thread_id } => w.write_i64(*thread_id),
            Message::MethodReturn { location, value } => {
                w.write_string(location);
                w.write_string(value);
            }
        }
    }
}

fn decode_init(r: &mut WireReader<'_>) -> Result<Message, CodecError> {
    Ok(Message::Init { pid: r.read_i32()? })
}

fn decode_busy(_r: &mut WireReader<'_>) -> Result<Message, CodecError> {
    Ok(Message::Busy)
}

fn decode_method_instrumentation_response(
    r: &mut WireReader<'_>,
) -> Result<Message, CodecError> {
    Ok(Message::MethodInstrumentationResponse {
        class_bytes: r.read_blob()?,
        method_name: r.read_string()?,
        descriptor: r.read_string()?,
    })
}

fn decode_request_method_instrumentation(
    r: &mut WireReader<'_>,
) -> Result<Message, CodecError> {
    Ok(Message::RequestMethodInstrumentation {
        class_name: r.read_string()?,
        method_name: r.read_string()?,
        descriptor: r.read_string()?,
    })
}

fn decode_exit(r: &mut WireReader<'_>) -> Result<Message, CodecError> {
    Ok(Message::Exit {
        exit_code: r.read_i32()?,
        message: r.read_string()?,
    })
}

fn decode_set_breakpoint(r: &mut WireReader<'_>) -> Result<Message, CodecError> {
    Ok(Message::SetBreakpoint {
        breakpoint_id: r.read_i32()?,
        class_name: r.read_string()?,
        line: r.read_i32()?,
    })
}

fn decode_clear_breakpoint(r: &mut WireReader<'_>) -> Result<Message, CodecError> {
    Ok(Message::ClearBreakpoint {
        breakpoint_id: r.read_i32()?,
    })
}

fn decode_breakpoint_hit(r: &mut WireReader<'_>) -> Result<Message, CodecError> {
    Ok(Message::BreakpointHit {
        breakpoint_id: r.read_i32()?,
        class_name: r.read_string()?,
        line: r.read_i32()?,
        thread_id: r.read_i64()?,
        thread_name: r.read_string()?,
        frames: r.read_string_list()?,
        locals: read_locals(r)?,
    })
}

fn write_locals(w: &mut WireWriter, locals: &[LocalVar]) {
    w.write_i32(locals.len() as i32);
    for local in locals {
        w.write_string(&local.name);
        w.write_string(&local.value);
    }
}

fn read_locals(r: &mut WireReader<'_>) -> Result<Vec<LocalVar>, CodecError> {
    let count = r.read_count()?;
    // Two string prefixes per entry at minimum
    if count.saturating_mul(8) > r.remaining() {
        return Err(CodecError::MalformedMessage {
            kind: "BreakpointHit",
            reason: format!("{} locals do not fit in {} bytes", count, r.remaining()),
        });
    }
    let mut locals = Vec::with_capacity(count);
    for _ in 0..count {
        locals.push(LocalVar {
            name: r.read_string()?,
            value: r.read_string()?,
        });
    }
    Ok(locals)
}

fn decode_resume(r: &mut WireReader<'_>) -> Result<Message, CodecError> {
    Ok(Message::Resume {
        thread_id: r.read_i64()?,
    })
}

fn decode_method_return(r: &mut WireReader<'_>) -> Result<Message, CodecError> {
    Ok(Message::MethodReturn {
        location: r.read_string()?,
        value: r.read_string()?,
    })
}
