//! Fuzz target for message envelope boundary conditions.
//!
//! Builds a variable-length code plus a 16-bit size field plus a payload,
//! covering the boundary values at each code-width transition (`0x7F/0x80`,
//! `0x7FF/0x800`, `0x7FFF/0x8000`) and at the declared-size extremes, then
//! decodes the result through the real envelope adapter.
//!
//! # Invariants
//!
//! - A declared size greater than the bytes actually available MUST decode
//!   as "needs more" (`Ok(true)`), never as a completed read of garbage.
//! - `read_code` MUST reject continuation bytes that don't match the width
//!   implied by the lead byte with `MalformedCode`, never panic or silently
//!   resync to a different code.
//! - Encode-then-decode of a boundary code MUST round-trip to the same
//!   value.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use netline_proto::code::{read_code, write_code};
use netline_proto::{EnvelopeAdapter, FrameBuffer, MessageFactory, ReadWriteAdapter};

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryEnvelope {
    code: CodeValue,
    declared_size: DeclaredSize,
    payload_len: u8,
}

#[derive(Debug, Clone, Arbitrary)]
enum CodeValue {
    Zero,
    OneByteMax,
    TwoByteMin,
    TwoByteMax,
    ThreeByteMin,
    ThreeByteMax,
    FourByteMin,
    FourByteMax,
    Random(u32),
}

#[derive(Debug, Clone, Arbitrary)]
enum DeclaredSize {
    Zero,
    Small(u8),
    MaxU16,
    Random(u16),
}

fn code_value(v: &CodeValue) -> u32 {
    match *v {
        CodeValue::Zero => 0,
        CodeValue::OneByteMax => 0x7F,
        CodeValue::TwoByteMin => 0x80,
        CodeValue::TwoByteMax => 0x7FF,
        CodeValue::ThreeByteMin => 0x800,
        CodeValue::ThreeByteMax => 0x7FFF,
        CodeValue::FourByteMin => 0x8000,
        CodeValue::FourByteMax => 0x1F_FFFF,
        CodeValue::Random(r) => r & 0x1F_FFFF,
    }
}

fuzz_target!(|boundary: BoundaryEnvelope| {
    let code = code_value(&boundary.code);

    // Round trip the code alone first: this must always succeed regardless
    // of what follows it on the wire.
    let mut code_buf = FrameBuffer::new(16);
    write_code(&mut code_buf, code).unwrap();
    code_buf.flip();
    let (decoded, _) = read_code(&mut code_buf).unwrap();
    assert_eq!(decoded, code);

    let declared = match boundary.declared_size {
        DeclaredSize::Zero => 0u16,
        DeclaredSize::Small(s) => u16::from(s),
        DeclaredSize::MaxU16 => u16::MAX,
        DeclaredSize::Random(r) => r,
    };

    let payload_len = (boundary.payload_len as usize).min(4096);
    let mut buf = FrameBuffer::new(payload_len + 8);
    let _ = write_code(&mut buf, code);
    let _ = buf.write_u16(declared);
    let _ = buf.write_bytes(&vec![0xAB; payload_len]);
    buf.flip();

    let factory = MessageFactory::new();
    let adapter = EnvelopeAdapter;
    match netline_proto::build_from_buffer(&mut buf, &factory) {
        Ok(Some(mut msg)) => {
            let _ = adapter.read_from(&mut buf, msg.as_mut());
        },
        Ok(None) | Err(_) => {},
    }
});
