//! Base-128 varints as used by the TES stream.
//!
//! Each byte carries seven payload bits, least significant group first, with
//! the high bit set on every byte except the last. Signed values are zigzag
//! folded first so small magnitudes of either sign stay short.

use crate::error::{Result, TileError};
use bytes::BufMut;

/// Append `value` to `buf`, one to ten bytes.
pub fn encode_varint<B: BufMut>(mut value: u64, buf: &mut B) {
    while value >= 0x80 {
        buf.put_u8(value as u8 | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn encode_signed_varint<B: BufMut>(value: i64, buf: &mut B) {
    encode_varint(zigzag_encode(value), buf);
}

/// Bytes [`encode_varint`] would write for `value`.
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Read one varint at `*pos` and move `*pos` to the byte after it.
///
/// Running out of input is [`TileError::UnexpectedEof`]; a value wider than
/// 64 bits is structural corruption at the byte that overflows.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let at = *pos;
        let byte = *buf.get(at).ok_or(TileError::UnexpectedEof { offset: at })?;
        *pos = at + 1;

        let bits = u64::from(byte & 0x7F);
        // The tenth byte may only contribute the top bit.
        if shift > 63 || (shift == 63 && bits > 1) {
            return Err(TileError::corrupt(at, "varint overflow"));
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Fold the sign into the low bit: 0, -1, 1, -2 become 0, 1, 2, 3.
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
