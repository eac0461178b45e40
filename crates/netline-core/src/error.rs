//! Error types for the connection state machine and listener.
//!
//! We avoid bare `std::io::Error` in protocol logic so that callers can
//! distinguish a closed peer from a malformed frame from a bad API call
//! without string matching.

use std::io;

use netline_proto::ProtocolError;
use thiserror::Error;

/// Errors surfaced by [`crate::connection::Connection`] and
/// [`crate::listener::Listener`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A public API call was made in a state that doesn't support it.
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// The state the connection was in.
        state: &'static str,
        /// The operation that was rejected.
        operation: &'static str,
    },

    /// The socket boundary reported a failure: closed peer, refused
    /// connect, or an OS-level I/O error.
    #[error("socket error: {0}")]
    Socket(String),

    /// The codec detected an inconsistent framing state (duplicate
    /// registration, malformed envelope, cursor violation).
    #[error("factory error: {0}")]
    Factory(String),

    /// Host resolution failed during connect.
    #[error("invalid host name: {0}")]
    InvalidHostName(String),

    /// The peer's address could not be resolved or used.
    #[error("invalid peer name: {0}")]
    InvalidPeerName(String),

    /// A bad public-API argument: unknown session id, unsupported address
    /// family, an out-of-range configuration value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The byte-order handshake did not complete within its deadline.
    #[error("handshake timed out after {elapsed_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds elapsed before giving up.
        elapsed_ms: u64,
    },
}

impl ConnectionError {
    /// Returns true if this error is transient and the caller might
    /// reasonably retry. Protocol violations and closed peers are never
    /// transient - they mean the connection is done.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. })
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Socket(err.to_string())
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(err: ProtocolError) -> Self {
        ConnectionError::Factory(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_timeouts_are_transient() {
        assert!(ConnectionError::HandshakeTimeout { elapsed_ms: 2000 }.is_transient());
    }

    #[test]
    fn protocol_violations_are_fatal() {
        assert!(!ConnectionError::Socket("closed".to_string()).is_transient());
        assert!(
            !ConnectionError::InvalidState { state: "idle", operation: "push" }.is_transient()
        );
        assert!(!ConnectionError::Factory("duplicate code".to_string()).is_transient());
    }
}
