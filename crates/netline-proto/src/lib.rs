//! Wire framing for the netline protocol.
//!
//! This crate owns everything that touches raw bytes: the cursor-based
//! [`buffer::FrameBuffer`], the variable-length [`code`] encoding for
//! message identifiers, and the [`message`] contract plus envelope adapter
//! that together frame user payloads onto the wire.
//!
//! It knows nothing about sockets, threads, or the connection state
//! machine — those live in `netline-core`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod buffer;
pub mod byte_order;
pub mod code;
pub mod error;
pub mod handshake;
pub mod message;

pub use buffer::FrameBuffer;
pub use byte_order::ByteOrder;
pub use error::ProtocolError;
pub use handshake::{CERTIFICATE_CODE, CHALLENGE_CODE};
pub use message::{
    build_from_buffer, ConsumeCounter, EnvelopeAdapter, GenericDrainMessage, Message, MessageFactory,
    ReadWriteAdapter, RunMessageError, DRAIN_CODE,
};
