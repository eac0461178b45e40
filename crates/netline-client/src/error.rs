//! Error types for [`crate::client::ProxyClient`].

use thiserror::Error;

/// Errors surfaced by [`crate::client::ProxyClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying connection reported an unrecoverable error (failed
    /// connect, mid-stream socket or codec failure).
    #[error("connection error: {0}")]
    Connection(#[from] netline_core::ConnectionError),

    /// The handshake's `ChallengeIn` handler rejected the server's
    /// advertised version. Fatal: the client does not retry.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(#[from] netline_proto::RunMessageError),

    /// A public API call was made in a state that doesn't support it (e.g.
    /// `push` before `connect`).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl ClientError {
    /// Returns true if this error is transient and the caller might
    /// reasonably retry the connect. A handshake rejection never is: the
    /// server will advertise the same version again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(err) => err.is_transient(),
            Self::HandshakeRejected(_) | Self::InvalidState(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_rejection_is_fatal() {
        let err = ClientError::HandshakeRejected(netline_proto::RunMessageError("version mismatch".to_string()));
        assert!(!err.is_transient());
    }
}
