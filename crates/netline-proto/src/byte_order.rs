//! Byte order negotiated between a [`crate::buffer::FrameBuffer`] pair.

/// Multi-byte scalar encoding used by a buffer.
///
/// The handshake in `netline-core` flips a freshly connected buffer's order
/// away from [`ByteOrder::native`] when the peer's native order differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Least-significant byte first.
    LittleEndian,
    /// Most-significant byte first.
    BigEndian,
}

impl ByteOrder {
    /// The order of the machine running this code.
    #[must_use]
    pub const fn native() -> Self {
        #[cfg(target_endian = "little")]
        {
            ByteOrder::LittleEndian
        }
        #[cfg(target_endian = "big")]
        {
            ByteOrder::BigEndian
        }
    }

    /// The other order. Used to flip a buffer during the handshake.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            ByteOrder::LittleEndian => ByteOrder::BigEndian,
            ByteOrder::BigEndian => ByteOrder::LittleEndian,
        }
    }

    /// Whether serializing in this order requires reversing the machine's
    /// native byte layout.
    #[must_use]
    pub const fn swaps_native(self) -> bool {
        !matches!((self, Self::native()), (ByteOrder::LittleEndian, ByteOrder::LittleEndian) | (ByteOrder::BigEndian, ByteOrder::BigEndian))
    }
}
