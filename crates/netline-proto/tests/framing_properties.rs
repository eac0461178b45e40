//! Framing idempotence: a concatenated stream of N frames must decode to
//! exactly N messages in order, no matter how the byte stream is chopped up
//! across read chunks. Mirrors the reassembly loop `netline_core::Connection
//! ::handle_read` runs against a real socket, minus the socket itself.

use std::any::Any;

use proptest::prelude::*;

use netline_proto::{
    build_from_buffer, ConsumeCounter, EnvelopeAdapter, FrameBuffer, Message, MessageFactory, ProtocolError,
    ReadWriteAdapter, RunMessageError,
};

const INT_FRAME_CODE: u32 = 0x50;

#[derive(Debug)]
struct IntFrame {
    value: i32,
    declared_size: Option<u16>,
    consume: ConsumeCounter,
}

impl IntFrame {
    fn outgoing(value: i32) -> Self {
        Self { value, declared_size: Some(4), consume: ConsumeCounter::default() }
    }

    fn incoming() -> Self {
        Self { value: 0, declared_size: None, consume: ConsumeCounter::default() }
    }
}

impl Message for IntFrame {
    fn code(&self) -> u32 {
        INT_FRAME_CODE
    }

    fn make_instance(&self) -> Box<dyn Message> {
        Box::new(IntFrame::incoming())
    }

    fn declared_size(&self) -> Option<u16> {
        self.declared_size
    }

    fn set_declared_size(&mut self, size: u16) {
        self.declared_size = Some(size);
    }

    fn read_from(&mut self, buf: &mut FrameBuffer) -> Result<bool, ProtocolError> {
        self.value = buf.read_i32()?;
        Ok(false)
    }

    fn write_to(&self, buf: &mut FrameBuffer) -> Result<usize, ProtocolError> {
        buf.write_i32(self.value)?;
        Ok(4)
    }

    fn run(&self, _ctx: &dyn Any) -> Result<(), RunMessageError> {
        Ok(())
    }

    fn consume_counter(&self) -> &ConsumeCounter {
        &self.consume
    }
}

fn encode_frames(values: &[i32]) -> Vec<u8> {
    let adapter = EnvelopeAdapter;
    let mut buf = FrameBuffer::new(values.len() * 16 + 16);
    for &value in values {
        adapter.write_to(&mut buf, &IntFrame::outgoing(value)).unwrap();
    }
    buf.flip();
    buf.readable_slice().to_vec()
}

/// Replays `encoded` into a read buffer in pieces sized by (cycling through)
/// `chunk_sizes`, running the same read-pending/`build_from_buffer`/compact
/// loop `Connection::handle_read` runs, and returns the decoded values in
/// arrival order.
fn decode_in_chunks(encoded: &[u8], chunk_sizes: &[usize], factory: &MessageFactory) -> Vec<i32> {
    let adapter = EnvelopeAdapter;
    let mut read_buf = FrameBuffer::new(encoded.len() + 64);
    let mut read_pending: Option<Box<dyn Message>> = None;
    let mut out = Vec::new();
    let mut offset = 0;
    let mut sizes = chunk_sizes.iter().cycle();

    while offset < encoded.len() || read_pending.is_some() {
        if offset < encoded.len() {
            let want = (*sizes.next().unwrap()).max(1);
            let available_room = read_buf.writable_slice().len();
            let take = want.min(available_room).min(encoded.len() - offset);
            if take > 0 {
                read_buf.writable_slice()[..take].copy_from_slice(&encoded[offset..offset + take]);
                read_buf.advance_limit(take).unwrap();
                offset += take;
            }
        }

        if let Some(mut msg) = read_pending.take() {
            let needs_more = adapter.read_from(&mut read_buf, msg.as_mut()).unwrap();
            if needs_more {
                read_pending = Some(msg);
            } else {
                out.push(value_of(&msg));
            }
        }

        while read_pending.is_none() && read_buf.available() > 0 {
            match build_from_buffer(&mut read_buf, factory).unwrap() {
                None => break,
                Some(mut msg) => {
                    let needs_more = adapter.read_from(&mut read_buf, msg.as_mut()).unwrap();
                    if needs_more {
                        read_pending = Some(msg);
                        break;
                    }
                    out.push(value_of(&msg));
                },
            }
        }

        read_buf.compact();

        if offset >= encoded.len() && read_pending.is_none() {
            break;
        }
    }

    out
}

/// The decoded `IntFrame`'s value, read via `run` storing into a cell since
/// the collection holds `Box<dyn Message>` and can't downcast back to the
/// concrete type.
fn value_of(msg: &Box<dyn Message>) -> i32 {
    let mut buf = FrameBuffer::new(8);
    msg.write_to(&mut buf).unwrap();
    buf.flip();
    buf.read_i32().unwrap()
}

fn int_frame_factory() -> MessageFactory {
    let mut factory = MessageFactory::new();
    factory.register(Box::new(IntFrame::incoming())).unwrap();
    factory
}

proptest! {
    /// `spec.md` §8's framing-idempotence property: N frames concatenated
    /// on the wire decode to exactly N messages in order, regardless of how
    /// the byte stream is partitioned into read chunks.
    #[test]
    fn framing_is_idempotent_across_arbitrary_chunking(
        values in prop::collection::vec(any::<i32>(), 1..24),
        chunk_sizes in prop::collection::vec(1usize..17, 1..8),
    ) {
        let encoded = encode_frames(&values);
        let factory = int_frame_factory();
        let decoded = decode_in_chunks(&encoded, &chunk_sizes, &factory);
        prop_assert_eq!(decoded, values);
    }
}

#[test]
fn single_chunk_decodes_every_frame_at_once() {
    let values = vec![1, 2, 3, 4, 5];
    let encoded = encode_frames(&values);
    let factory = int_frame_factory();
    let decoded = decode_in_chunks(&encoded, &[encoded.len()], &factory);
    assert_eq!(decoded, values);
}

#[test]
fn byte_at_a_time_still_decodes_every_frame() {
    let values = vec![10, -20, 30, -40];
    let encoded = encode_frames(&values);
    let factory = int_frame_factory();
    let decoded = decode_in_chunks(&encoded, &[1], &factory);
    assert_eq!(decoded, values);
}
