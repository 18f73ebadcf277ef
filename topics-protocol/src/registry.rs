//! Message ID table
//!
//! Both peers must agree on the numeric ID of every message kind. IDs are
//! handed out from a counter in registration order, so the order of
//! [`WIRE_TABLE`] *is* the protocol; changing it requires bumping
//! [`PROTOCOL_VERSION`](crate::PROTOCOL_VERSION).

use std::collections::HashMap;

use bytes::Bytes;

use crate::codec::CodecError;
use crate::messages::{DecodeFn, Direction, Message, MessageKind};
use crate::wire::{WireReader, WireWriter};

/// Registration order for protocol version 1
pub const WIRE_TABLE: [(MessageKind, Direction); 10] = [
    (MessageKind::Init, Direction::Inbound),
    (MessageKind::Busy, Direction::Outbound),
    (MessageKind::MethodInstrumentationResponse, Direction::Inbound),
    (MessageKind::RequestMethodInstrumentation, Direction::Outbound),
    (MessageKind::Exit, Direction::Outbound),
    (MessageKind::SetBreakpoint, Direction::Outbound),
    (MessageKind::ClearBreakpoint, Direction::Outbound),
    (MessageKind::BreakpointHit, Direction::Inbound),
    (MessageKind::Resume, Direction::Outbound),
    (MessageKind::MethodReturn, Direction::Inbound),
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("message kind {0} registered twice")]
    Duplicate(MessageKind),

    #[error("message kind {0} is not registered")]
    Missing(MessageKind),

    #[error("message kind {kind} registered as {registered:?}, expected {expected:?}")]
    DirectionMismatch {
        kind: MessageKind,
        registered: Direction,
        expected: Direction,
    },
}

/// One row of the table
#[derive(Clone, Copy)]
pub struct Registration {
    pub id: i32,
    pub kind: MessageKind,
    pub direction: Direction,
    decode: DecodeFn,
}

impl Registration {
    /// Build a message of this kind from its payload
    pub fn decode(&self, payload: &[u8]) -> Result<Message, CodecError> {
        let mut reader = WireReader::new(payload, self.kind.name());
        let message = (self.decode)(&mut reader)?;
        reader.finish()?;
        Ok(message)
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Bidirectional kind <-> ID map
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct Registry {
    by_id: Vec<Registration>,
    by_kind: HashMap<MessageKind, i32>,
}

impl Registry {
    /// An empty registry; the next registration gets ID 0
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry for the current protocol version
    pub fn standard() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (kind, direction) in WIRE_TABLE {
            match direction {
                Direction::Inbound => registry.register_inbound(kind)?,
                Direction::Outbound => registry.register_outbound(kind)?,
            };
        }
        registry.verify_complete()?;
        Ok(registry)
    }

    pub fn register_inbound(&mut self, kind: MessageKind) -> Result<i32, RegistryError> {
        self.register(kind, Direction::Inbound)
    }

    pub fn register_outbound(&mut self, kind: MessageKind) -> Result<i32, RegistryError> {
        self.register(kind, Direction::Outbound)
    }

    fn register(&mut self, kind: MessageKind, direction: Direction) -> Result<i32, RegistryError> {
        if self.by_kind.contains_key(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }
        if kind.direction() != direction {
            return Err(RegistryError::DirectionMismatch {
                kind,
                registered: direction,
                expected: kind.direction(),
            });
        }

        let id = self.by_id.len() as i32;
        self.by_id.push(Registration {
            id,
            kind,
            direction,
            decode: kind.decoder(),
        });
        self.by_kind.insert(kind, id);
        Ok(id)
    }

    /// Check that every message kind has an ID
    pub fn verify_complete(&self) -> Result<(), RegistryError> {
        for kind in MessageKind::ALL {
            if !self.by_kind.contains_key(&kind) {
                return Err(RegistryError::Missing(kind));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn try_id_of(&self, kind: MessageKind) -> Option<i32> {
        self.by_kind.get(&kind).copied()
    }

    /// ID of a registered kind
    ///
    /// # Panics
    ///
    /// Panics if `kind` was never registered. Every kind is registered before
    /// the first connection, so reaching this is a bug.
    pub fn id_of(&self, kind: MessageKind) -> i32 {
        match self.try_id_of(kind) {
            Some(id) => id,
            None => panic!("message kind {} has no registered id", kind),
        }
    }

    pub fn kind_of(&self, id: i32) -> Option<&Registration> {
        usize::try_from(id).ok().and_then(|idx| self.by_id.get(idx))
    }

    /// Encode a message as a frame body: ID followed by payload
    pub fn encode(&self, message: &Message) -> Bytes {
        let mut w = WireWriter::new();
        w.write_i32(self.id_of(message.kind()));
        message.write_payload(&mut w);
        w.into_bytes()
    }

    pub fn decode(&self, id: i32, payload: &[u8]) -> Result<Message, CodecError> {
        let registration = self
            .kind_of(id)
            .ok_or(CodecError::UnknownMessageKind { id })?;
        registration.decode(payload)
    }

    /// Decode a whole frame body as produced by [`Registry::encode`]
    pub fn decode_frame(&self, body: &[u8]) -> Result<Message, CodecError> {
        let mut reader = WireReader::new(body, "frame");
        let id = reader.read_i32()?;
        self.decode(id, &body[4..])
    }
}
