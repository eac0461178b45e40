//! Client-side handshake messages.
//!
//! `ChallengeIn` is the prototype registered in every [`crate::client::ProxyClient`]'s
//! factory; its `run` compares the server's advertised version against the
//! client's own and, on a match, replies with `CertificateOut`. The
//! session-side counterparts (`ChallengeOut`, `CertificateIn`) live in
//! `netline-server`.

use std::any::Any;
use std::net::TcpStream;
use std::sync::Arc;

use netline_core::Socket;
use netline_proto::{ConsumeCounter, FrameBuffer, Message, ProtocolError, RunMessageError};
use netline_proto::{CERTIFICATE_CODE, CHALLENGE_CODE};

use crate::client::ProxyClient;

/// Received by the client immediately after connect: the server's protocol
/// version and a 16-byte challenge the client doesn't itself need to
/// inspect (only the session echoes it back via the certificate exchange).
#[derive(Debug)]
pub struct ChallengeIn {
    version: u32,
    challenge: [u8; 16],
    declared_size: Option<u16>,
    consume: ConsumeCounter,
}

impl ChallengeIn {
    /// An empty prototype, registered once in the client's factory.
    #[must_use]
    pub fn new() -> Self {
        Self { version: 0, challenge: [0u8; 16], declared_size: None, consume: ConsumeCounter::default() }
    }
}

impl Default for ChallengeIn {
    fn default() -> Self {
        Self::new()
    }
}

impl Message for ChallengeIn {
    fn code(&self) -> u32 {
        CHALLENGE_CODE
    }

    fn make_instance(&self) -> Box<dyn Message> {
        Box::new(ChallengeIn::new())
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

/// `ProxyClient` is generic over its socket type, but `Message::run` only
/// sees `&dyn Any`. Production clients use `TcpStream`; tests use
/// `PipeSocket`. Mirrors the same two-type downcast dance the session side
/// uses for `CertificateIn::run`.
fn run_with_socket_type<S: Socket + 'static>(msg: &ChallengeIn, ctx: &dyn Any) -> Option<Result<(), RunMessageError>> {
    let client = ctx.downcast_ref::<ProxyClient<S>>()?;
    if msg.version != client.version() {
        return Some(Err(RunMessageError(format!(
            "server advertised version {}, client configured for {}",
            msg.version,
            client.version()
        ))));
    }
    let reply = CertificateOut::new(client.certificate().to_vec());
    client.push(Arc::new(reply));
    Some(Ok(()))
}

/// Sent by the client in reply to a matching `ChallengeIn`: the
/// configured certificate bytes, compared byte-for-byte by the session's
/// `CertificateIn::run`.
#[derive(Debug)]
pub struct CertificateOut {
    bytes: Vec<u8>,
    declared_size: Option<u16>,
    consume: ConsumeCounter,
}

impl CertificateOut {
    /// A certificate reply ready to push onto the client's outgoing queue.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        let declared_size = Some(u16::try_from(bytes.len()).unwrap_or(u16::MAX));
        Self { bytes, declared_size, consume: ConsumeCounter::default() }
    }
}

impl Message for CertificateOut {
    fn code(&self) -> u32 {
        CERTIFICATE_CODE
    }

    fn make_instance(&self) -> Box<dyn Message> {
        Box::new(CertificateOut::new(Vec::new()))
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

    fn write_to(&self, buf: &mut FrameBuffer) -> Result<usize, ProtocolError> {
        buf.write_bytes(&self.bytes)?;
        Ok(self.bytes.len())
    }

    fn consume_counter(&self) -> &ConsumeCounter {
        &self.consume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netline_core::socket::PipeSocket;
    use netline_core::ConnectionConfig;

    #[test]
    fn matching_version_replies_with_certificate() {
        let (socket, _peer) = PipeSocket::pair();
        let client = ProxyClient::with_socket(socket, ConnectionConfig::default(), 3, vec![0xAA, 0xBB]);

        let mut msg = ChallengeIn::new();
        msg.version = 3;
        msg.run(client.as_ref()).unwrap();

        assert!(client.has_pending_outgoing());
    }

    #[test]
    fn mismatched_version_is_fatal() {
        let (socket, _peer) = PipeSocket::pair();
        let client = ProxyClient::with_socket(socket, ConnectionConfig::default(), 3, vec![0xAA, 0xBB]);

        let mut msg = ChallengeIn::new();
        msg.version = 4;
        let err = msg.run(client.as_ref()).unwrap_err();
        assert!(err.0.contains("version"));
    }
}
