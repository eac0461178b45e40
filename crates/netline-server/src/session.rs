//! A single authenticated connection accepted by [`crate::server::ProxyServer`].
//!
//! A `Session` is a [`Connection`] plus the bookkeeping the proxy server's
//! authentication handshake and worker-pool tick need: a stable id, a
//! `valid` flag set once the certificate check passes, a `cancel` flag the
//! handshake (or an external `terminate_session` call) can raise, and the
//! 16-byte challenge generated at construction. It deliberately does not
//! hold a reference back to its owning server — the worker pool passes one
//! in per tick instead, per the reference design's note on breaking the
//! session/server ownership cycle.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};

use netline_core::{Connection, ConnectionConfig, Socket};
use netline_proto::MessageFactory;
use std::sync::Arc;

/// An accepted, possibly-not-yet-authenticated connection.
///
/// `Message::run` is handed `&dyn Any`, and `Any::downcast_ref` only works
/// against `'static` types — so `CertificateIn::run` cannot be passed a
/// short-lived wrapper struct borrowing both the session and the server's
/// certificate. `Session` owns its expected certificate (cloned from the
/// server's configuration at construction) instead, so the whole `&Session`
/// can serve as the downcast target directly.
pub struct Session<S: Socket = TcpStream> {
    id: u64,
    connection: Connection<S>,
    challenge: [u8; 16],
    expected_certificate: Arc<[u8]>,
    valid: AtomicBool,
    cancel: AtomicBool,
}

impl<S: Socket> Session<S> {
    /// Wrap a freshly accepted socket as a session, generating its
    /// challenge via `random_bytes`.
    pub fn new(
        id: u64,
        socket: S,
        config: ConnectionConfig,
        factory: Arc<MessageFactory>,
        expected_certificate: Arc<[u8]>,
        random_bytes: impl FnOnce(&mut [u8; 16]),
    ) -> Self {
        let connection = Connection::new_session(socket, config, factory, None);
        let mut challenge = [0u8; 16];
        random_bytes(&mut challenge);
        Self {
            id,
            connection,
            challenge,
            expected_certificate,
            valid: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }

    /// The certificate bytes this session expects the client to echo back.
    #[must_use]
    pub fn expected_certificate(&self) -> &[u8] {
        &self.expected_certificate
    }

    /// This session's stable id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The challenge generated at construction, sent to the client as part
    /// of `ChallengeOut`.
    #[must_use]
    pub fn challenge(&self) -> [u8; 16] {
        self.challenge
    }

    /// Whether the certificate check has passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the session authenticated. Called by `CertificateIn::run`.
    pub fn set_valid(&self) {
        self.valid.store(true, Ordering::Release);
    }

    /// Mark the session for removal on the next tick. Called by
    /// `CertificateIn::run` on mismatch, or externally by
    /// `ProxyServer::terminate_session`.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Whether this session is marked for removal.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// The underlying connection, for pushing outgoing messages
    /// (`send`/`multicast`) or driving the I/O loop (`tick`).
    #[must_use]
    pub fn connection(&self) -> &Connection<S> {
        &self.connection
    }

    /// Mutable access to the underlying connection, needed only by
    /// [`Self::tick`] to call `poll_once`.
    pub fn connection_mut(&mut self) -> &mut Connection<S> {
        &mut self.connection
    }
}

impl<S: Socket + 'static> Session<S> {
    /// One scheduler tick: drive the connection's I/O once, then dispatch at
    /// most one popped message against this session. Returns `-1` once the
    /// worker pool should stop scheduling this session (cancelled, the
    /// connection shut down, or the dispatched message rejected its
    /// payload); `0` to keep scheduling.
    ///
    /// Whether to actually remove the session from the registry is the
    /// caller's job: `Session` has no reference back to the registry that
    /// owns it.
    pub fn tick(&mut self) -> i32 {
        if self.is_cancelled() {
            return -1;
        }

        if self.connection.poll_once().is_err() || !self.connection.is_ready() {
            return -1;
        }

        if let Some(msg) = self.connection.pop() {
            if msg.run(self).is_err() {
                return -1;
            }
            // The consume counter tracks multicast fan-out, not Rust's own
            // memory management: `msg` is freed on drop regardless of the
            // count it returns.
            msg.consume();
        }

        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netline_core::socket::PipeSocket;

    #[test]
    fn fresh_session_is_neither_valid_nor_cancelled() {
        let (socket, _peer) = PipeSocket::pair();
        let session = Session::new(
            0,
            socket,
            ConnectionConfig::default(),
            Arc::new(MessageFactory::new()),
            Arc::from(vec![0xAAu8, 0xBB]),
            |buf| buf.fill(7),
        );
        assert!(!session.is_valid());
        assert!(!session.is_cancelled());
        assert_eq!(session.challenge(), [7u8; 16]);
    }

    #[test]
    fn cancel_and_set_valid_are_independently_observable() {
        let (socket, _peer) = PipeSocket::pair();
        let session = Session::new(
            1,
            socket,
            ConnectionConfig::default(),
            Arc::new(MessageFactory::new()),
            Arc::from(vec![0xAAu8, 0xBB]),
            |buf| buf.fill(0),
        );
        session.set_valid();
        assert!(session.is_valid());
        session.cancel();
        assert!(session.is_cancelled());
    }
}
