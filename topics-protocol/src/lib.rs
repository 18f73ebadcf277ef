//! topics-protocol: wire definitions shared by the console and the agent
//!
//! A frame is a big-endian `u32` length followed by an `i32` message ID and
//! the message payload. [`FrameCodec`] splits the byte stream, [`Registry`]
//! maps IDs to [`Message`] kinds and encodes/decodes payloads.

pub mod codec;
pub mod messages;
pub mod registry;
pub mod wire;

// Re-export main types at crate root
pub use codec::{CodecError, FrameCodec, MAX_FRAME_SIZE};
pub use messages::{Direction, LocalVar, Message, MessageKind};
pub use registry::{Registration, Registry, RegistryError, WIRE_TABLE};
pub use wire::{WireReader, WireWriter};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;
