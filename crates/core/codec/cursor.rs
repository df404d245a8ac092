//! Bounds-checked readers over tile and TES bytes.
//!
//! [`ByteView`] reads little-endian words at arbitrary offsets and resolves
//! relative pointers; [`DecodeCursor`] reads a stream front to back. Neither
//! ever indexes past the end of its buffer: every read returns a typed error
//! instead.

use crate::codec::varint::{decode_varint, zigzag_decode};
use crate::error::{Result, TileError};

/// Random-access view over a tile buffer.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    buf: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self, at: u32, len: usize) -> Result<&'a [u8]> {
        let start = at as usize;
        let end = start
            .checked_add(len)
            .ok_or(TileError::UnexpectedEof { offset: start })?;
        self.buf
            .get(start..end)
            .ok_or(TileError::UnexpectedEof { offset: start })
    }

    /// Everything from `at` to the end of the buffer.
    pub fn tail(&self, at: u32) -> Result<&'a [u8]> {
        self.buf
            .get(at as usize..)
            .ok_or(TileError::UnexpectedEof { offset: at as usize })
    }

    pub fn u8_at(&self, at: u32) -> Result<u8> {
        Ok(self.bytes(at, 1)?[0])
    }

    pub fn u16_at(&self, at: u32) -> Result<u16> {
        let b = self.bytes(at, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_at(&self, at: u32) -> Result<u32> {
        let b = self.bytes(at, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32_at(&self, at: u32) -> Result<i32> {
        Ok(self.u32_at(at)? as i32)
    }

    /// Resolve `base + delta`, failing if the target falls outside the buffer.
    pub fn pointer(&self, base: u32, delta: i32) -> Result<u32> {
        let target = base as i64 + delta as i64;
        if target < 0 || target >= self.buf.len() as i64 {
            return Err(TileError::corrupt(
                base as usize,
                format!("pointer to {} outside tile of {} bytes", target, self.buf.len()),
            ));
        }
        Ok(target as u32)
    }

    /// Position `at - back`, failing if it would precede the buffer start.
    pub fn below(&self, at: u32, back: u32) -> Result<u32> {
        at.checked_sub(back)
            .ok_or_else(|| TileError::corrupt(at as usize, "backward read before tile start"))
    }
}

/// Sequential reader over a byte stream.
#[derive(Debug, Clone)]
pub struct DecodeCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DecodeCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(TileError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn varint(&mut self) -> Result<u64> {
        decode_varint(self.buf, &mut self.pos)
    }

    /// A varint that must fit in 32 bits.
    pub fn varint_u32(&mut self) -> Result<u32> {
        let start = self.pos;
        let value = self.varint()?;
        u32::try_from(value).map_err(|_| TileError::corrupt(start, "varint exceeds 32 bits"))
    }

    pub fn signed_varint(&mut self) -> Result<i64> {
        Ok(zigzag_decode(self.varint()?))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(TileError::UnexpectedEof { offset: self.pos })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// A count that is plausible given the bytes left, assuming each counted
    /// item takes at least `min_item_size` bytes.
    pub fn count(&mut self, min_item_size: usize) -> Result<usize> {
        let start = self.pos;
        let count = self.varint()? as usize;
        if count.saturating_mul(min_item_size.max(1)) > self.remaining() {
            return Err(TileError::corrupt(
                start,
                format!("count {} exceeds remaining {} bytes", count, self.remaining()),
            ));
        }
        Ok(count)
    }
}
