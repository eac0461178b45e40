//! Byte-oriented framing buffer.
//!
//! A fixed-capacity byte arena with independent read and write cursors,
//! byte-order-aware scalar I/O, and explicit compaction. The codec and the
//! I/O loop share one buffer per direction instead of allocating per
//! message.
//!
//! # Invariants
//!
//! `0 <= position() <= limit() <= capacity()` holds across every public
//! method on this type.

use crate::byte_order::ByteOrder;
use crate::error::ProtocolError;

/// Fixed-capacity read/write cursor buffer.
///
/// `position` is the read cursor, `limit` is the write cursor — the naming
/// mirrors the buffer's dual role as both an output arena (bytes appended up
/// to `limit`) and an input arena (bytes consumed from `position`).
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    data: Vec<u8>,
    capacity: usize,
    position: usize,
    limit: usize,
    order: ByteOrder,
}

impl FrameBuffer {
    /// Create a buffer with the given fixed capacity, using the machine's
    /// native byte order.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_order(capacity, ByteOrder::native())
    }

    /// Create a buffer with an explicit byte order.
    #[must_use]
    pub fn with_order(capacity: usize, order: ByteOrder) -> Self {
        Self { data: vec![0u8; capacity], capacity, position: 0, limit: 0, order }
    }

    /// Total arena size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes available to read (`limit - position`).
    #[must_use]
    pub fn available(&self) -> usize {
        self.limit - self.position
    }

    /// Bytes free to write in the contiguous tail (`capacity - limit`).
    ///
    /// This is the tail only: bytes already consumed at the head (`0..position`)
    /// are not reusable until [`Self::compact`] runs.
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity - self.limit
    }

    /// Read cursor.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the read cursor. Must not pass the write cursor.
    pub fn set_position(&mut self, position: usize) -> Result<(), ProtocolError> {
        if position > self.limit {
            return Err(ProtocolError::InvalidCursor("position exceeds limit"));
        }
        self.position = position;
        Ok(())
    }

    /// Write cursor.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Move the write cursor. Must stay inside capacity.
    pub fn set_limit(&mut self, limit: usize) -> Result<(), ProtocolError> {
        if limit >= self.capacity {
            return Err(ProtocolError::InvalidCursor("limit at or past capacity"));
        }
        self.limit = limit;
        Ok(())
    }

    /// Current byte order used for multi-byte scalar and UTF-8 length I/O.
    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Replace the byte order. Used once, right after the connect-time
    /// handshake negotiates which order the peer uses.
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Shift unread bytes `[position..limit)` to the head and reset cursors
    /// accordingly, reclaiming the head as writable space.
    pub fn compact(&mut self) {
        if self.position == self.limit {
            self.position = 0;
            self.limit = 0;
            return;
        }
        self.data.copy_within(self.position..self.limit, 0);
        self.limit -= self.position;
        self.position = 0;
    }

    /// Reset the read cursor to the head, allowing the already-written bytes
    /// to be read again from the start.
    pub fn flip(&mut self) {
        self.position = 0;
    }

    /// Mutable view of the writable tail, for a socket `recv` to fill
    /// directly without an intermediate copy.
    pub fn writable_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.limit..self.capacity]
    }

    /// Advance the write cursor after bytes were placed via
    /// [`Self::writable_slice`].
    pub fn advance_limit(&mut self, n: usize) -> Result<(), ProtocolError> {
        if n > self.free() {
            return Err(ProtocolError::BufferOverflow { requested: n, available: self.free() });
        }
        self.limit += n;
        Ok(())
    }

    /// View of the readable region, for a socket `send` to read directly.
    #[must_use]
    pub fn readable_slice(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// Advance the read cursor after bytes were consumed via
    /// [`Self::readable_slice`].
    pub fn advance_position(&mut self, n: usize) -> Result<(), ProtocolError> {
        if n > self.available() {
            return Err(ProtocolError::BufferOverflow { requested: n, available: self.available() });
        }
        self.position += n;
        Ok(())
    }

    /// Append raw bytes, failing with [`ProtocolError::BufferOverflow`] if
    /// there isn't enough free tail space.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let free = self.free();
        if bytes.len() > free {
            return Err(ProtocolError::BufferOverflow { requested: bytes.len(), available: free });
        }
        let start = self.limit;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.limit += bytes.len();
        Ok(())
    }

    /// Consume and return `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let available = self.available();
        if len > available {
            return Err(ProtocolError::BufferOverflow { requested: len, available });
        }
        let start = self.position;
        let out = self.data[start..start + len].to_vec();
        self.position += len;
        Ok(out)
    }

    /// Write a single byte as a boolean (`0` or `1`).
    pub fn write_bool(&mut self, value: bool) -> Result<(), ProtocolError> {
        self.write_u8(u8::from(value))
    }

    /// Read a boolean byte (any nonzero value is `true`).
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Write a UTF-8 string as a 16-bit length prefix (in the buffer's byte
    /// order) followed by the raw encoded bytes.
    pub fn write_utf8(&mut self, value: &str) -> Result<(), ProtocolError> {
        let bytes = value.as_bytes();
        let len = u16::try_from(bytes.len())
            .map_err(|_| ProtocolError::BufferOverflow { requested: bytes.len(), available: u16::MAX as usize })?;
        self.write_u16(len)?;
        self.write_bytes(bytes)
    }

    /// Read a length-prefixed UTF-8 string. An empty length yields an empty
    /// string and still consumes the two length bytes.
    pub fn read_utf8(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

macro_rules! impl_scalar_io {
    ($write:ident, $read:ident, $ty:ty, $width:expr) => {
        impl FrameBuffer {
            #[doc = concat!("Write a `", stringify!($ty), "` in the buffer's current byte order.")]
            pub fn $write(&mut self, value: $ty) -> Result<(), ProtocolError> {
                let bytes = match self.order {
                    ByteOrder::LittleEndian => value.to_le_bytes(),
                    ByteOrder::BigEndian => value.to_be_bytes(),
                };
                self.write_bytes(&bytes)
            }

            #[doc = concat!("Read a `", stringify!($ty), "` in the buffer's current byte order.")]
            pub fn $read(&mut self) -> Result<$ty, ProtocolError> {
                let bytes = self.read_bytes($width)?;
                let mut arr = [0u8; $width];
                arr.copy_from_slice(&bytes);
                Ok(match self.order {
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(arr),
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(arr),
                })
            }
        }
    };
}

impl FrameBuffer {
    /// Write a single `i8`. Byte order is irrelevant for one byte.
    pub fn write_i8(&mut self, value: i8) -> Result<(), ProtocolError> {
        self.write_bytes(&[value as u8])
    }

    /// Read a single `i8`.
    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.read_bytes(1)?[0] as i8)
    }

    /// Write a single `u8`.
    pub fn write_u8(&mut self, value: u8) -> Result<(), ProtocolError> {
        self.write_bytes(&[value])
    }

    /// Read a single `u8`.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_bytes(1)?[0])
    }
}

impl_scalar_io!(write_i16, read_i16, i16, 2);
impl_scalar_io!(write_u16, read_u16, u16, 2);
impl_scalar_io!(write_i32, read_i32, i32, 4);
impl_scalar_io!(write_u32, read_u32, u32, 4);
impl_scalar_io!(write_i64, read_i64, i64, 8);
impl_scalar_io!(write_u64, read_u64, u64, 8);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_buffer_has_zero_cursors() {
        let buf = FrameBuffer::new(64);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 0);
        assert_eq!(buf.available(), 0);
        assert_eq!(buf.free(), 64);
    }

    #[test]
    fn compact_preserves_unread_tail() {
        let mut buf = FrameBuffer::new(16);
        buf.write_bytes(&[1, 2, 3, 4]).unwrap();
        buf.advance_position(2).unwrap();
        buf.compact();
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 2);
        assert_eq!(buf.readable_slice(), &[3, 4]);
    }

    #[test]
    fn compact_on_fully_drained_buffer_resets_to_zero() {
        let mut buf = FrameBuffer::new(16);
        buf.write_bytes(&[9, 9]).unwrap();
        buf.advance_position(2).unwrap();
        buf.compact();
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 0);
    }

    #[test]
    fn overflow_on_write_past_capacity() {
        let mut buf = FrameBuffer::new(4);
        let err = buf.write_bytes(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, ProtocolError::BufferOverflow { .. }));
    }

    #[test]
    fn overflow_on_read_past_available() {
        let mut buf = FrameBuffer::new(4);
        buf.write_u8(1).unwrap();
        let err = buf.read_u16().unwrap_err();
        assert!(matches!(err, ProtocolError::BufferOverflow { .. }));
    }

    #[test]
    fn empty_utf8_round_trips_and_consumes_length_prefix() {
        let mut buf = FrameBuffer::new(16);
        buf.write_utf8("").unwrap();
        assert_eq!(buf.limit(), 2);
        buf.flip();
        assert_eq!(buf.read_utf8().unwrap(), "");
    }

    proptest! {
        #[test]
        fn round_trip_u32_both_orders(v: u32, swap: bool) {
            let order = if swap { ByteOrder::BigEndian } else { ByteOrder::LittleEndian };
            let mut buf = FrameBuffer::with_order(16, order);
            buf.write_u32(v).unwrap();
            buf.flip();
            prop_assert_eq!(buf.read_u32().unwrap(), v);
        }

        #[test]
        fn round_trip_i64(v: i64) {
            let mut buf = FrameBuffer::new(32);
            buf.write_i64(v).unwrap();
            buf.flip();
            prop_assert_eq!(buf.read_i64().unwrap(), v);
        }

        #[test]
        fn round_trip_utf8(s in "\\PC{0,200}") {
            let mut buf = FrameBuffer::new(4096);
            buf.write_utf8(&s).unwrap();
            buf.flip();
            prop_assert_eq!(buf.read_utf8().unwrap(), s);
        }

        #[test]
        fn cursor_monotonicity(ops in prop::collection::vec(0u8..3, 0..50)) {
            let mut buf = FrameBuffer::new(256);
            for op in ops {
                match op {
                    0 if buf.free() >= 4 => { let _ = buf.write_u32(7); },
                    1 if buf.available() >= 4 => { let _ = buf.read_u32(); },
                    2 => buf.compact(),
                    _ => {},
                }
                prop_assert!(buf.position() <= buf.limit());
                prop_assert!(buf.limit() <= buf.capacity());
            }
        }
    }
}
