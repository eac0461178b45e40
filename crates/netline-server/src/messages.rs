//! Session-side handshake messages.
//!
//! `ChallengeOut` is sent by a freshly accepted session; `CertificateIn` is
//! the reply the session's tick dispatches. `Message::run` only sees a
//! `&dyn Any`, so the downcast target must be `'static` — `CertificateIn`
//! downcasts straight to the owning `&Session<S>` rather than any borrowed
//! wrapper. The client-side counterparts (`ChallengeIn`, `CertificateOut`)
//! live in `netline-client`.

use std::any::Any;
use std::net::TcpStream;

use netline_core::Socket;
use netline_proto::{ConsumeCounter, FrameBuffer, Message, ProtocolError, RunMessageError};
use netline_proto::{CERTIFICATE_CODE, CHALLENGE_CODE};

use crate::session::Session;

/// Sent by a session immediately after acceptance: the server's protocol
/// version and this session's 16-byte challenge.
#[derive(Debug)]
pub struct ChallengeOut {
    version: u32,
    challenge: [u8; 16],
    declared_size: Option<u16>,
    consume: ConsumeCounter,
}

impl ChallengeOut {
    /// A challenge message ready to be pushed onto a session's outgoing
    /// queue.
    #[must_use]
    pub fn new(version: u32, challenge: [u8; 16]) -> Self {
        Self { version, challenge, declared_size: Some(20), consume: ConsumeCounter::default() }
    }
}

impl Message for ChallengeOut {
    fn code(&self) -> u32 {
        CHALLENGE_CODE
    }

    fn make_instance(&self) -> Box<dyn Message> {
        Box::new(ChallengeOut::new(0, [0u8; 16]))
    }

    fn declared_size(&self) -> Option<u16> {
        self.declared_size
    }

    fn set_declared_size(&mut self, size: u16) {
        self.declared_size = Some(size);
    }

    fn read_from(&mut self, buf: &mut FrameBuffer) -> Result<bool, ProtocolError> {
        self.version = buf.read_u32()?;
        let bytes = buf.read_bytes(16)?;
        self.challenge.copy_from_slice(&bytes);
        Ok(false)
    }

    fn write_to(&self, buf: &mut FrameBuffer) -> Result<usize, ProtocolError> {
        buf.write_u32(self.version)?;
        buf.write_bytes(&self.challenge)?;
        Ok(20)
    }

    fn consume_counter(&self) -> &ConsumeCounter {
        &self.consume
    }
}

/// Received by a session: the client's echoed certificate bytes. `run`
/// compares them against [`Session::expected_certificate`] and marks the
/// session valid or cancelled accordingly.
#[derive(Debug)]
pub struct CertificateIn {
    bytes: Vec<u8>,
    declared_size: Option<u16>,
    consume: ConsumeCounter,
}

impl CertificateIn {
    /// An empty prototype, registered once in the session factory.
    #[must_use]
    pub fn new() -> Self {
        Self { bytes: Vec::new(), declared_size: None, consume: ConsumeCounter::default() }
    }
}

impl Default for CertificateIn {
    fn default() -> Self {
        Self::new()
    }
}

impl Message for CertificateIn {
    fn code(&self) -> u32 {
        CERTIFICATE_CODE
    }

    fn make_instance(&self) -> Box<dyn Message> {
        Box::new(CertificateIn::new())
    }

    fn declared_size(&self) -> Option<u16> {
        self.declared_size
    }

    fn set_declared_size(&mut self, size: u16) {
        self.declared_size = Some(size);
    }

    fn read_from(&mut self, buf: &mut FrameBuffer) -> Result<bool, ProtocolError> {
        let size = self.declared_size.unwrap_or(0) as usize;
        self.bytes = buf.read_bytes(size)?;
        Ok(false)
    }

    fn write_to(&self, _buf: &mut FrameBuffer) -> Result<usize, ProtocolError> {
        Ok(0)
    }

    fn run(&self, ctx: &dyn Any) -> Result<(), RunMessageError> {
        run_with_socket_type::<TcpStream>(self, ctx)
            .or_else(|| run_with_socket_type::<netline_core::PipeSocket>(self, ctx))
            .unwrap_or(Ok(()))
    }

    fn consume_counter(&self) -> &ConsumeCounter {
        &self.consume
    }
}

/// `Session` is generic over the session's socket type, but `Message::run`
/// only sees `&dyn Any`. Production sessions use `TcpStream`; tests use
/// `PipeSocket`. Trying both downcasts keeps the trait object-safe without a
/// socket-type parameter leaking into `Message`.
fn run_with_socket_type<S: Socket + 'static>(msg: &CertificateIn, ctx: &dyn Any) -> Option<Result<(), RunMessageError>> {
    let session = ctx.downcast_ref::<Session<S>>()?;
    if msg.bytes == session.expected_certificate() {
        session.set_valid();
    } else {
        session.cancel();
    }
    Some(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use netline_core::socket::PipeSocket;
    use netline_core::ConnectionConfig;
    use netline_proto::MessageFactory;
    use std::sync::Arc;

    #[test]
    fn matching_certificate_marks_session_valid() {
        let (socket, _peer) = PipeSocket::pair();
        let session = Session::new(
            0,
            socket,
            ConnectionConfig::default(),
            Arc::new(MessageFactory::new()),
            Arc::from(vec![0xAAu8, 0xBB]),
            |buf| buf.fill(0),
        );

        let mut msg = CertificateIn::new();
        msg.bytes = vec![0xAA, 0xBB];
        msg.run(&session).unwrap();

        assert!(session.is_valid());
        assert!(!session.is_cancelled());
    }

    #[test]
    fn mismatched_certificate_cancels_session() {
        let (socket, _peer) = PipeSocket::pair();
        let session = Session::new(
            0,
            socket,
            ConnectionConfig::default(),
            Arc::new(MessageFactory::new()),
            Arc::from(vec![0xAAu8, 0xBB]),
            |buf| buf.fill(0),
        );

        let mut msg = CertificateIn::new();
        msg.bytes = vec![0xAA, 0xCC];
        msg.run(&session).unwrap();

        assert!(!session.is_valid());
        assert!(session.is_cancelled());
    }
}
