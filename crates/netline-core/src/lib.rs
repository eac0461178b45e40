//! Connection state machine, socket boundary, and scheduling primitives for
//! the netline protocol.
//!
//! Built on [`netline_proto`]'s framing and codec; this crate adds the
//! symmetric client/session I/O loop, the byte-order handshake, the bounded
//! cross-thread queues, and the listener poll loop. The proxy server's
//! worker pool and session registry live in `netline-server`; this crate
//! only provides the primitives they drive.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod listener;
pub mod queue;
pub mod socket;

pub use connection::{
    Connect, Connection, ConnectionConfig, ConnectionSignal, ConnectionState, Role, ShutdownCause,
    DEFAULT_BUFFER_CAPACITY, DEFAULT_READ_TIMEOUT_US, HANDSHAKE_DEADLINE,
};
pub use env::{Environment, SystemEnvironment};
pub use error::ConnectionError;
pub use listener::{Listen, Listener, ListenerState, POLL_INTERVAL};
pub use queue::{SpscQueue, CAPACITY};
pub use socket::{connect, resolve_bind_addr, AddressFamily, PipeSocket, Socket, SocketRuntime};
