//! Error taxonomy for the wire format and message codec.

use thiserror::Error;

/// Errors produced by [`crate::buffer::FrameBuffer`] and [`crate::message`]
/// codec operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A read or write requested more bytes than the buffer has available or
    /// free. The design uses a single overflow kind for both directions.
    #[error("buffer overflow: requested {requested} bytes, {available} available")]
    BufferOverflow {
        /// Bytes the caller asked for.
        requested: usize,
        /// Bytes actually available (free on write, readable on read).
        available: usize,
    },

    /// A `set_position`/`set_limit` call violated the buffer's cursor
    /// invariants.
    #[error("invalid cursor: {0}")]
    InvalidCursor(&'static str),

    /// Bytes did not form valid UTF-8 on a `read_utf8` call.
    #[error("invalid utf-8 in buffer payload")]
    InvalidUtf8,

    /// A message code was registered twice in a [`crate::message::MessageFactory`].
    #[error("factory error: code {code} already registered")]
    DuplicateRegistration {
        /// The code that collided.
        code: u32,
    },

    /// A code was decoded with a continuation-byte pattern that did not
    /// match any defined width.
    #[error("malformed message code encoding")]
    MalformedCode,
}

impl ProtocolError {
    /// True for conditions where retrying the same operation later (after
    /// more bytes arrive, or after a compaction) could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ProtocolError::BufferOverflow { .. })
    }
}
