//! Authenticated multi-session proxy server for the netline protocol.
//!
//! Built on [`netline_core`]'s `Connection` state machine: a [`ProxyServer`]
//! owns a [`registry::SessionRegistry`] (id allocation plus the `id ->
//! Session` map), a [`driver::WorkerPool`] ticking every registered session
//! at a fixed cadence, and a `netline_core::Listener` accepting new sockets
//! on a dedicated thread. [`session::Session`] wraps each accepted
//! `Connection` with the bookkeeping the challenge/certificate handshake
//! needs; [`messages`] carries the session side of that handshake.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod driver;
pub mod error;
pub mod messages;
pub mod registry;
pub mod server;
pub mod session;

pub use driver::WorkerPool;
pub use error::ServerError;
pub use messages::{CertificateIn, ChallengeOut};
pub use registry::{IdAllocator, SessionRegistry};
pub use server::ProxyServer;
pub use session::Session;
