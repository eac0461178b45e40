//! Server error types.

use thiserror::Error;

/// Errors surfaced by [`crate::server::ProxyServer`] and its worker pool.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad public-API argument: unknown session id, invalid bind
    /// configuration.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The bind/listen socket boundary failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A session's connection reported an unrecoverable error.
    #[error("connection error: {0}")]
    Connection(#[from] netline_core::ConnectionError),

    /// A message's `run` handler rejected its payload.
    #[error("message run rejected: {0}")]
    RunRejected(#[from] netline_proto::RunMessageError),
}

impl ServerError {
    /// Returns true if this error is transient and the caller might
    /// reasonably retry. A missing session (the client already disconnected
    /// by the time a send was attempted) is the only retryable case here;
    /// everything else indicates a configuration or protocol problem.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::InvalidParameter(_))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
