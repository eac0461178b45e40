//! Full handshake round trip over a real TCP loopback socket: a
//! hand-rolled peer plays the session side (byte-order header, then a
//! `ChallengeOut`-shaped frame) without a full `netline_server::ProxyServer`,
//! and checks the client replies with the certificate it was configured
//! with. Complements the in-isolation unit tests in `messages.rs`/`client.rs`,
//! which drive `ChallengeIn::run` and `ProxyClient` state directly rather
//! than through a socket.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use netline_client::ProxyClient;
use netline_core::ConnectionConfig;
use netline_proto::code::write_code;
use netline_proto::{FrameBuffer, CERTIFICATE_CODE, CHALLENGE_CODE};

/// Accept one connection, write the byte-order handshake header and a
/// `ChallengeOut`-shaped frame (version + 16-byte challenge), then read back
/// whatever the client replies with as a raw `(code, payload)` pair.
fn play_session_side(listener: &TcpListener, version: u32, challenge: [u8; 16]) -> (u8, Vec<u8>) {
    let (mut stream, _) = listener.accept().unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream.write_all(&1i32.to_ne_bytes()).unwrap();

    let mut wire = FrameBuffer::new(32);
    write_code(&mut wire, CHALLENGE_CODE).unwrap();
    wire.write_u16(20).unwrap();
    wire.write_u32(version).unwrap();
    wire.write_bytes(&challenge).unwrap();
    wire.flip();
    stream.write_all(wire.readable_slice()).unwrap();

    let mut header = [0u8; 3];
    stream.read_exact(&mut header).unwrap();
    let size = u16::from_ne_bytes([header[1], header[2]]) as usize;
    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload).unwrap();

    (header[0], payload)
}

#[test]
fn client_replies_to_matching_challenge_with_its_certificate() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let challenge = [7u8; 16];

    let session = std::thread::spawn(move || play_session_side(&listener, 3, challenge));

    let config = ConnectionConfig { host: addr.ip().to_string(), port: addr.port(), ..ConnectionConfig::default() };
    let client = ProxyClient::<TcpStream>::new(config, 3, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    client.connect().unwrap();

    let (code, certificate) = session.join().unwrap();
    assert_eq!(code, CERTIFICATE_CODE as u8);
    assert_eq!(certificate, vec![0xDE, 0xAD, 0xBE, 0xEF]);

    client.disconnect();
}

#[test]
fn client_does_not_reply_when_advertised_version_mismatches() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let challenge = [9u8; 16];

    let session = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream.write_all(&1i32.to_ne_bytes()).unwrap();

        let mut wire = FrameBuffer::new(32);
        write_code(&mut wire, CHALLENGE_CODE).unwrap();
        wire.write_u16(20).unwrap();
        wire.write_u32(5).unwrap();
        wire.write_bytes(&challenge).unwrap();
        wire.flip();
        stream.write_all(wire.readable_slice()).unwrap();

        // The client configured for version 3 should never send a reply to
        // a version-5 challenge, so this read should time out empty-handed.
        let mut probe = [0u8; 1];
        stream.read(&mut probe)
    });

    let config = ConnectionConfig { host: addr.ip().to_string(), port: addr.port(), ..ConnectionConfig::default() };
    let client = ProxyClient::<TcpStream>::new(config, 3, vec![0xAA]);
    client.connect().unwrap();

    let result = session.join().unwrap();
    match result {
        Ok(n) => assert_eq!(n, 0, "client should not have sent any reply bytes"),
        Err(err) => assert!(matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)),
    }

    client.disconnect();
}
