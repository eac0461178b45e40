//! Variable-length message code encoding.
//!
//! Message codes are encoded UTF-8-style in 1 to 4 bytes, so that common
//! low-numbered codes cost a single byte on the wire while still leaving
//! room for a full 21-bit code space.
//!
//! ```text
//! c <  0x80    : 0xxxxxxx
//! c <  0x800   : 110xxxxx 10xxxxxx
//! c <  0x8000  : 1110xxxx 10xxxxxx 10xxxxxx
//! c >= 0x8000  : 11110xxx 10xxxxxx 10xxxxxx 10xxxxxx
//! ```

use crate::buffer::FrameBuffer;
use crate::error::ProtocolError;

/// Write `code` to `buf` using the variable-length encoding, returning the
/// number of bytes written (1 to 4).
pub fn write_code(buf: &mut FrameBuffer, code: u32) -> Result<usize, ProtocolError> {
    if code < 0x80 {
        buf.write_u8(code as u8)?;
        Ok(1)
    } else if code < 0x800 {
        buf.write_u8(0xC0 | ((code >> 6) as u8))?;
        buf.write_u8(0x80 | ((code & 0x3F) as u8))?;
        Ok(2)
    } else if code < 0x8000 {
        buf.write_u8(0xE0 | ((code >> 12) as u8))?;
        buf.write_u8(0x80 | (((code >> 6) & 0x3F) as u8))?;
        buf.write_u8(0x80 | ((code & 0x3F) as u8))?;
        Ok(3)
    } else {
        buf.write_u8(0xF0 | ((code >> 18) as u8))?;
        buf.write_u8(0x80 | (((code >> 12) & 0x3F) as u8))?;
        buf.write_u8(0x80 | (((code >> 6) & 0x3F) as u8))?;
        buf.write_u8(0x80 | ((code & 0x3F) as u8))?;
        Ok(4)
    }
}

/// Decode a variable-length code from `buf`, returning the code and the
/// number of bytes consumed (1 to 4). Fails with
/// [`ProtocolError::BufferOverflow`] if the continuation bytes aren't all
/// available yet (the caller should retry once more bytes arrive) and with
/// [`ProtocolError::MalformedCode`] if the continuation bits don't match the
/// width implied by the lead byte.
pub fn read_code(buf: &mut FrameBuffer) -> Result<(u32, usize), ProtocolError> {
    let mark = buf.position();
    let lead = buf.read_u8()?;

    if lead & 0x80 == 0 {
        return Ok((u32::from(lead), 1));
    }

    let width = if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else if lead & 0xF8 == 0xF0 {
        4
    } else {
        buf.set_position(mark)?;
        return Err(ProtocolError::MalformedCode);
    };

    if buf.available() < width - 1 {
        buf.set_position(mark)?;
        return Err(ProtocolError::BufferOverflow { requested: width - 1, available: buf.available() });
    }

    let mut code = u32::from(lead & (0x7F >> width));
    for _ in 1..width {
        let cont = buf.read_u8()?;
        if cont & 0xC0 != 0x80 {
            buf.set_position(mark)?;
            return Err(ProtocolError::MalformedCode);
        }
        code = (code << 6) | u32::from(cont & 0x3F);
    }

    Ok((code, width))
}
