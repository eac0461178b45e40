//! Fuzz target for decoding arbitrary bytes as message envelopes.
//!
//! Loads `data` straight into a [`netline_proto::FrameBuffer`] and repeatedly
//! calls `build_from_buffer` against an empty factory (everything falls
//! through to `GenericDrainMessage`), then drives the message's adapter read
//! to completion. Must never panic: malformed input should only ever
//! produce a `ProtocolError` or leave bytes unconsumed for the next read.

#![no_main]

use libfuzzer_sys::fuzz_target;
use netline_proto::{build_from_buffer, EnvelopeAdapter, FrameBuffer, MessageFactory, ReadWriteAdapter};

fuzz_target!(|data: &[u8]| {
    if data.len() > 64 * 1024 {
        return;
    }

    let mut buf = FrameBuffer::new(data.len().max(1) + 64);
    let _ = buf.write_bytes(data);

    let factory = MessageFactory::new();
    let adapter = EnvelopeAdapter;

    for _ in 0..1024 {
        let mark = buf.position();
        match build_from_buffer(&mut buf, &factory) {
            Ok(Some(mut msg)) => match adapter.read_from(&mut buf, msg.as_mut()) {
                Ok(_) => {},
                Err(_) => break,
            },
            Ok(None) => break,
            Err(_) => break,
        }
        if buf.position() == mark {
            break;
        }
    }
});
