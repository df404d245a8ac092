//! Low-level encodings shared by the tile and TES formats.

pub mod cursor;
pub mod flags;
pub mod varint;

pub use cursor::{ByteView, DecodeCursor};
pub use flags::{EntryFlags, FeatureFlags, MemberFlags, TagFlags};

use crate::error::{Result, TileError};

/// Longest string a tile can hold (15-bit length prefix).
pub const MAX_STRING_LEN: usize = 0x7fff;

const NARROW_TIP_DELTA: std::ops::RangeInclusive<i32> = -(1 << 14)..=(1 << 14) - 1;
const WIDE_TIP_DELTA: std::ops::RangeInclusive<i32> = -(1 << 30)..=(1 << 30) - 1;

/// Bytes taken by a length-prefixed tile string.
pub fn string_size(len: usize) -> u32 {
    if len < 0x80 {
        len as u32 + 1
    } else {
        len as u32 + 2
    }
}

/// Read a length-prefixed string at `at`.
pub fn read_string(view: &ByteView<'_>, at: u32) -> Result<String> {
    let first = view.u8_at(at)?;
    let (len, header) = if first & 0x80 == 0 {
        (first as usize, 1)
    } else {
        let second = view.u8_at(at + 1)?;
        (((first & 0x7f) as usize) | ((second as usize) << 7), 2)
    };
    let bytes = view.bytes(at + header, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| TileError::corrupt(at as usize, "string is not valid UTF-8"))
}

/// Bytes taken by a TIP delta, or an error if it cannot be encoded.
pub fn tip_delta_size(delta: i32) -> Result<u32> {
    if NARROW_TIP_DELTA.contains(&delta) {
        Ok(2)
    } else if WIDE_TIP_DELTA.contains(&delta) {
        Ok(4)
    } else {
        Err(TileError::CapacityExceeded(format!(
            "TIP delta {} exceeds 31 bits",
            delta
        )))
    }
}

/// Decode a TIP delta stored front to back. Returns the delta and its size.
pub fn read_tip_delta(view: &ByteView<'_>, at: u32) -> Result<(i32, u32)> {
    let low = view.u16_at(at)?;
    if low & 1 == 0 {
        return Ok(((low as i16 >> 1) as i32, 2));
    }
    let high = view.u16_at(at + 2)?;
    Ok(((((high as u32) << 16) | low as u32) as i32 >> 1, 4))
}

/// Decode a TIP delta stored below `at`, its high half at the lower address.
pub fn read_tip_delta_below(view: &ByteView<'_>, at: u32) -> Result<(i32, u32)> {
    let low = view.u16_at(view.below(at, 2)?)?;
    if low & 1 == 0 {
        return Ok(((low as i16 >> 1) as i32, 2));
    }
    let high = view.u16_at(view.below(at, 4)?)?;
    Ok(((((high as u32) << 16) | low as u32) as i32 >> 1, 4))
}

/// Mutable bounds-checked view used when writing a tile.
pub struct ByteSink<'a> {
    buf: &'a mut [u8],
}

impl<'a> ByteSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub fn put(&mut self, at: u32, bytes: &[u8]) -> Result<()> {
        let start = at as usize;
        let dest = self
            .buf
            .get_mut(start..start.saturating_add(bytes.len()))
            .ok_or_else(|| TileError::Layout(format!("write at {} past end of tile", at)))?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    pub fn put_u16(&mut self, at: u32, value: u16) -> Result<()> {
        self.put(at, &value.to_le_bytes())
    }

    pub fn put_u32(&mut self, at: u32, value: u32) -> Result<()> {
        self.put(at, &value.to_le_bytes())
    }

    pub fn put_i32(&mut self, at: u32, value: i32) -> Result<()> {
        self.put(at, &value.to_le_bytes())
    }

    /// Write a length-prefixed string. Returns the bytes written.
    pub fn put_string(&mut self, at: u32, text: &str) -> Result<u32> {
        let len = text.len();
        let header = if len < 0x80 {
            self.put(at, &[len as u8])?;
            1
        } else {
            self.put(at, &[(len as u8 & 0x7f) | 0x80, (len >> 7) as u8])?;
            2
        };
        self.put(at + header, text.as_bytes())?;
        Ok(header + len as u32)
    }

    /// Write a TIP delta front to back. Returns the bytes written.
    pub fn put_tip_delta(&mut self, at: u32, delta: i32) -> Result<u32> {
        let size = tip_delta_size(delta)?;
        let raw = delta << 1;
        if size == 2 {
            self.put_u16(at, raw as u16)?;
        } else {
            let raw = raw | 1;
            self.put_u16(at, raw as u16)?;
            self.put_u16(at + 2, (raw >> 16) as u16)?;
        }
        Ok(size)
    }

    /// Write a TIP delta ending at `at` (exclusive), high half lowest.
    /// Returns the bytes written.
    pub fn put_tip_delta_below(&mut self, at: u32, delta: i32) -> Result<u32> {
        let size = tip_delta_size(delta)?;
        let start = at
            .checked_sub(size)
            .ok_or_else(|| TileError::Layout(format!("TIP delta below {} underflows", at)))?;
        let raw = delta << 1;
        if size == 2 {
            self.put_u16(start, raw as u16)?;
        } else {
            let raw = raw | 1;
            self.put_u16(start + 2, raw as u16)?;
            self.put_u16(start, (raw >> 16) as u16)?;
        }
        Ok(size)
    }
}
