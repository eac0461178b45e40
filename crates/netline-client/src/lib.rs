//! Proxy client for the netline messaging protocol.
//!
//! [`ProxyClient`] wraps a [`netline_core::Connection`] with the two threads
//! a client needs that a server-side `Session` doesn't: a dedicated I/O
//! thread (a session is instead ticked by the server's worker pool) and a
//! consumer thread draining received messages. [`ChallengeIn`] and
//! [`CertificateOut`] carry the client side of the authentication
//! handshake; the session side (`ChallengeOut`/`CertificateIn`) lives in
//! `netline_server`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod messages;

pub use client::ProxyClient;
pub use error::ClientError;
pub use messages::{CertificateOut, ChallengeIn};
