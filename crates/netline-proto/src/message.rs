//! Message contract, prototype factory, and the envelope adapter that frames
//! user payloads onto a [`FrameBuffer`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use thiserror::Error;

use crate::buffer::FrameBuffer;
use crate::code::{read_code, write_code};
use crate::error::ProtocolError;

/// Reserved code bound to the generic drain message in every factory.
pub const DRAIN_CODE: u32 = 0xFFFF;

/// Raised when a message's [`Message::run`] rejects the payload it was
/// handed. Callers catch this, never let it escape the consumer loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("message run rejected: {0}")]
pub struct RunMessageError(pub String);

/// A reference-style counter replacing refcounting for multicast messages.
///
/// A freshly constructed message defaults to a counter of 1. The proxy
/// server's `multicast` raises it to the number of recipients before
/// enqueueing the same message to each session; each session decrements it
/// once after framing, and the message is considered spent when the counter
/// reaches zero.
#[derive(Debug)]
pub struct ConsumeCounter(AtomicI32);

impl ConsumeCounter {
    /// A counter that releases after `n` consumes.
    #[must_use]
    pub fn new(n: i32) -> Self {
        Self(AtomicI32::new(n))
    }

    /// Reset the counter, e.g. before a multicast to `n` sessions.
    pub fn set(&self, n: i32) {
        self.0.store(n, Ordering::Release);
    }

    /// Decrement the counter. Returns `true` once it has reached zero or
    /// below, meaning this was the last consume and the message may be
    /// released.
    pub fn consume(&self) -> bool {
        self.0.fetch_sub(1, Ordering::AcqRel) <= 1
    }
}

impl Default for ConsumeCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Contract for user-defined messages.
///
/// Implementors are registered once as a prototype in a [`MessageFactory`];
/// `make_instance` is then used to produce a fresh decode target for each
/// incoming frame carrying that code.
///
/// `Send + Sync`: a multicast message is wrapped in one `Arc` and pushed
/// onto several sessions' outgoing queues, each drained by that session's
/// own worker-pool thread, so the same `dyn Message` is read concurrently
/// from more than one thread.
pub trait Message: Send + Sync {
    /// The wire code identifying this message's payload shape.
    fn code(&self) -> u32;

    /// Produce a fresh, empty sibling of this message's concrete type.
    fn make_instance(&self) -> Box<dyn Message>;

    /// The payload size: set by the sender at construction, or by the
    /// adapter once it has read the size field off the wire on the
    /// receiving side.
    fn declared_size(&self) -> Option<u16>;

    /// Record the payload size. Called at most once per message instance.
    fn set_declared_size(&mut self, size: u16);

    /// Consume bytes for this message's payload from `buf`. Returns `true`
    /// if the message still needs more bytes (a partial/streaming read),
    /// `false` once the payload is fully consumed.
    fn read_from(&mut self, buf: &mut FrameBuffer) -> Result<bool, ProtocolError>;

    /// Serialize this message's payload into `buf`. Returns the number of
    /// bytes actually written, checked against `declared_size` by the
    /// adapter.
    fn write_to(&self, buf: &mut FrameBuffer) -> Result<usize, ProtocolError>;

    /// Invoked on the consumer (client) or session (server) thread once the
    /// message has been fully read. The default does nothing; messages that
    /// drive protocol logic (the auth handshake, application messages)
    /// override this.
    fn run(&self, _ctx: &dyn Any) -> Result<(), RunMessageError> {
        Ok(())
    }

    /// This message's consume counter.
    fn consume_counter(&self) -> &ConsumeCounter;

    /// Decrement the consume counter, returning `true` if this was the last
    /// reference (the message may now be released).
    fn consume(&self) -> bool {
        self.consume_counter().consume()
    }
}

/// Discards an unrecognized payload by its declared length instead of
/// rejecting the frame, so unknown codes don't desynchronize the stream.
#[derive(Debug)]
pub struct GenericDrainMessage {
    declared_size: Option<u16>,
    remaining: u16,
    consume: ConsumeCounter,
}

impl GenericDrainMessage {
    /// A fresh drain message with no declared size yet.
    #[must_use]
    pub fn new() -> Self {
        Self { declared_size: None, remaining: 0, consume: ConsumeCounter::default() }
    }
}

impl Default for GenericDrainMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl Message for GenericDrainMessage {
    fn code(&self) -> u32 {
        DRAIN_CODE
    }

    fn make_instance(&self) -> Box<dyn Message> {
        Box::new(GenericDrainMessage::new())
    }

    fn declared_size(&self) -> Option<u16> {
        self.declared_size
    }

    fn set_declared_size(&mut self, size: u16) {
        self.declared_size = Some(size);
        self.remaining = size;
    }

    fn read_from(&mut self, buf: &mut FrameBuffer) -> Result<bool, ProtocolError> {
        let take = self.remaining.min(buf.available() as u16);
        buf.advance_position(take as usize)?;
        self.remaining -= take;
        Ok(self.remaining > 0)
    }

    fn write_to(&self, _buf: &mut FrameBuffer) -> Result<usize, ProtocolError> {
        Ok(0)
    }

    fn consume_counter(&self) -> &ConsumeCounter {
        &self.consume
    }
}

/// A sparse registry mapping message codes to prototype instances.
///
/// Rendered as a `HashMap` rather than a literal sparse vector: Rust's
/// standard associative container is the idiomatic stand-in for the
/// original's index-by-code array, with the same "no entry -> fall through
/// to the drain message" lookup semantics.
pub struct MessageFactory {
    prototypes: HashMap<u32, Box<dyn Message>>,
}

impl MessageFactory {
    /// An empty factory. Incoming frames with no registered code still
    /// decode, via [`GenericDrainMessage`].
    #[must_use]
    pub fn new() -> Self {
        Self { prototypes: HashMap::new() }
    }

    /// Register a prototype under its own `code()`. Fails if that code is
    /// already registered.
    pub fn register(&mut self, prototype: Box<dyn Message>) -> Result<(), ProtocolError> {
        let code = prototype.code();
        if self.prototypes.contains_key(&code) {
            return Err(ProtocolError::DuplicateRegistration { code });
        }
        self.prototypes.insert(code, prototype);
        Ok(())
    }

    /// Produce a fresh message instance for `code`, or a
    /// [`GenericDrainMessage`] if nothing is registered under it.
    #[must_use]
    pub fn create(&self, code: u32) -> Box<dyn Message> {
        match self.prototypes.get(&code) {
            Some(prototype) => prototype.make_instance(),
            None => Box::new(GenericDrainMessage::new()),
        }
    }

    /// Number of registered prototypes (excludes the implicit drain message).
    #[must_use]
    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    /// Whether no prototypes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames a [`Message`]'s payload with a wire envelope: variable-length
/// code, 16-bit size, payload.
///
/// An adapter is optional per the spec's design: a `Connection` with none
/// configured falls through to calling a message's `read_from`/`write_to`
/// directly against a buffer that already has the size known (e.g. a
/// loopback `execute` path). [`EnvelopeAdapter`] is the default, wire-facing
/// implementation.
pub trait ReadWriteAdapter: Send + Sync {
    /// Resume or start reading `msg`'s envelope and payload from `buf`.
    /// Returns `true` if more bytes are needed before the message is
    /// complete.
    fn read_from(&self, buf: &mut FrameBuffer, msg: &mut dyn Message) -> Result<bool, ProtocolError>;

    /// Write `msg`'s envelope (code, size) and payload to `buf`.
    fn write_to(&self, buf: &mut FrameBuffer, msg: &dyn Message) -> Result<(), ProtocolError>;
}

/// The default envelope adapter implementing the wire format in full.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeAdapter;

impl ReadWriteAdapter for EnvelopeAdapter {
    fn read_from(&self, buf: &mut FrameBuffer, msg: &mut dyn Message) -> Result<bool, ProtocolError> {
        if msg.declared_size().is_none() {
            match buf.read_u16() {
                Ok(size) => msg.set_declared_size(size),
                Err(ProtocolError::BufferOverflow { .. }) => return Ok(true),
                Err(other) => return Err(other),
            }
        }

        // INVARIANT: the branch above sets it whenever it was None.
        #[allow(clippy::expect_used)]
        let size = msg.declared_size().expect("declared_size set above");
        if (buf.available() as u16) < size {
            return Ok(true);
        }

        msg.read_from(buf)
    }

    fn write_to(&self, buf: &mut FrameBuffer, msg: &dyn Message) -> Result<(), ProtocolError> {
        let size = msg.declared_size().unwrap_or(0);
        let needed = size as usize + 6;
        if buf.free() < needed {
            return Err(ProtocolError::BufferOverflow { requested: needed, available: buf.free() });
        }

        write_code(buf, msg.code())?;
        buf.write_u16(size)?;
        let written = msg.write_to(buf)?;

        if written as u16 != size {
            tracing::warn!(code = msg.code(), declared = size, written, "message wrote a different size than declared");
        }

        Ok(())
    }
}

/// Decode the variable-length code from `buf` and hand the rest of the
/// envelope to `factory`/`adapter`. Returns `None` if the code itself isn't
/// fully available yet (the framer should retry after the next socket
/// read).
pub fn build_from_buffer(
    buf: &mut FrameBuffer,
    factory: &MessageFactory,
) -> Result<Option<Box<dyn Message>>, ProtocolError> {
    let mark = buf.position();
    match read_code(buf) {
        Ok((code, _width)) => Ok(Some(factory.create(code))),
        Err(ProtocolError::BufferOverflow { .. }) => {
            buf.set_position(mark)?;
            Ok(None)
        },
        Err(other) => Err(other),
    }
}
