//! LEB128 variable-length integers.
//!
//! Every integer in the shard formats (codes, lengths, counts) is written as
//! an unsigned LEB128 varint: 7 value bits per byte, high bit set on every
//! byte except the last. Small values, which dominate real dictionaries,
//! cost a single byte.

use std::io::{self, Write};

/// Largest encoded size of a u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Writes `value` as LEB128 and returns the number of bytes written.
pub fn write_varint<W: Write + ?Sized>(writer: &mut W, mut value: u64) -> io::Result<usize> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut len = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf[len] = byte;
            len += 1;
            break;
        }
        buf[len] = byte | 0x80;
        len += 1;
    }
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Appends `value` as LEB128 to an in-memory buffer.
pub fn push_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decodes a LEB128 varint from `buf` starting at `*pos`, advancing `*pos`
/// past the consumed bytes.
///
/// Fails with `UnexpectedEof` when the buffer ends mid-varint and with
/// `InvalidData` when the encoding runs past 10 bytes or overflows u64.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> io::Result<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *buf.get(*pos).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "varint ends past buffer")
        })?;
        *pos += 1;

        if shift == 63 && byte > 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint overflows u64",
            ));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint longer than 10 bytes",
            ));
        }
    }
}
