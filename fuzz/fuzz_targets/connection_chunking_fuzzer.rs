//! Fuzz target for framing across arbitrary socket read boundaries.
//!
//! Feeds the fuzzer's input to a live [`netline_core::Connection`] session
//! through a [`netline_core::socket::PipeSocket`], split into pseudo-random
//! chunk sizes derived from the input itself, polling the connection
//! between every chunk. This exercises the framer's partial-read handling
//! (`read_pending`, `compact`) the way a real TCP stream's arbitrary
//! segmentation would, without needing a real socket.
//!
//! # Invariants
//!
//! - `poll_once` must never panic regardless of how the byte stream is
//!   chopped up.
//! - A malformed or truncated frame must only ever shut the connection down
//!   (`ShutdownCause::InternalError`/`SocketClosed`) or stall waiting for
//!   more bytes — never desynchronize into an infinite loop or a crash.

#![no_main]

use std::io::Write;
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use netline_core::socket::PipeSocket;
use netline_core::{Connection, ConnectionConfig};
use netline_proto::MessageFactory;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 8192 {
        return;
    }

    let (session_socket, mut peer) = PipeSocket::pair();
    let factory = Arc::new(MessageFactory::new());
    let mut session = Connection::new_session(session_socket, ConnectionConfig::default(), factory, None);

    // One-shot handshake write; the session is the writer side.
    let _ = session.poll_once();

    let mut offset = 0;
    let mut chunk_seed = 0usize;
    while offset < data.len() {
        let seed_byte = data[chunk_seed % data.len()];
        let chunk_len = (usize::from(seed_byte) % 7 + 1).min(data.len() - offset);
        let _ = peer.write_all(&data[offset..offset + chunk_len]);
        offset += chunk_len;
        chunk_seed += 1;

        if session.poll_once().is_err() {
            return;
        }
        while let Some(msg) = session.pop() {
            let _ = msg.consume();
        }
        if session.is_shutdown() {
            return;
        }
    }

    for _ in 0..4 {
        if session.poll_once().is_err() {
            return;
        }
        while let Some(msg) = session.pop() {
            let _ = msg.consume();
        }
    }
});
