//! Bounds-checked byte views over a raw FED word buffer
//!
//! The VME bridge hands over the event as 32-bit words whose byte lanes are
//! swapped relative to the FED's own byte stream. A view corrects this on
//! every access: logical byte `k` is native byte `k ^ 3` of the
//! little-endian word stream, so each 32-bit word reads MSB first.
//! Multi-byte values are composed big-endian from logical bytes.

use std::ops::Sub;

use crate::common::{DecodeError, DecodeResult};

/// Non-owning window `[offset, offset + len)` into a word buffer
#[derive(Debug, Clone, Copy)]
pub struct EventBufferView<'a> {
    words: &'a [u32],
    offset: usize,
    len: usize,
}

impl<'a> EventBufferView<'a> {
    /// View over the whole buffer
    pub fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            offset: 0,
            len: words.len() * 4,
        }
    }

    /// View over `len` bytes starting at byte `offset`
    pub fn with_range(words: &'a [u32], offset: usize, len: usize) -> DecodeResult<Self> {
        let buffer_len = words.len() * 4;
        if offset.checked_add(len).map_or(true, |end| end > buffer_len) {
            return Err(DecodeError::OutOfBounds {
                offset: offset.saturating_add(len),
                len: buffer_len,
            });
        }
        Ok(Self { words, offset, len })
    }

    /// Remaining bytes in the view
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte offset of the view start in the underlying buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the underlying buffer in bytes
    pub fn buffer_len(&self) -> usize {
        self.words.len() * 4
    }

    /// Underlying word buffer
    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    #[inline]
    fn byte_at(&self, absolute: usize) -> u8 {
        let word = self.words[absolute >> 2];
        (word >> (8 * (3 - (absolute & 3)))) as u8
    }

    #[inline]
    fn check(&self, index: usize, size: usize) -> DecodeResult<()> {
        if index.checked_add(size).map_or(true, |end| end > self.len) {
            return Err(DecodeError::OutOfBounds {
                offset: index,
                len: self.len,
            });
        }
        Ok(())
    }

    pub fn get_u8(&self, index: usize) -> DecodeResult<u8> {
        self.check(index, 1)?;
        Ok(self.byte_at(self.offset + index))
    }

    pub fn get_u16(&self, index: usize) -> DecodeResult<u16> {
        self.check(index, 2)?;
        let base = self.offset + index;
        Ok(u16::from_be_bytes([self.byte_at(base), self.byte_at(base + 1)]))
    }

    pub fn get_u32(&self, index: usize) -> DecodeResult<u32> {
        self.check(index, 4)?;
        let base = self.offset + index;
        Ok(u32::from_be_bytes([
            self.byte_at(base),
            self.byte_at(base + 1),
            self.byte_at(base + 2),
            self.byte_at(base + 3),
        ]))
    }

    /// Change the view length, keeping the start
    pub fn resize(&mut self, new_len: usize) -> DecodeResult<()> {
        if self.offset + new_len > self.buffer_len() {
            return Err(DecodeError::OutOfBounds {
                offset: self.offset + new_len,
                len: self.buffer_len(),
            });
        }
        self.len = new_len;
        Ok(())
    }

    /// Move the start forward by `n` bytes, shrinking the view
    pub fn advance(&mut self, n: usize) -> DecodeResult<()> {
        if n > self.len {
            return Err(DecodeError::OutOfBounds {
                offset: n,
                len: self.len,
            });
        }
        self.offset += n;
        self.len -= n;
        Ok(())
    }

    /// Advance the start to the next 4-byte boundary of the buffer
    pub fn normalize(&mut self) -> DecodeResult<()> {
        let pad = (4 - self.offset % 4) % 4;
        self.advance(pad)
    }

    /// Sub-view of `len` bytes at `start` within this view
    pub fn sub_view(&self, start: usize, len: usize) -> DecodeResult<Self> {
        self.check(start, len)?;
        Ok(Self {
            words: self.words,
            offset: self.offset + start,
            len,
        })
    }

    /// Logical bytes of the view
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        (self.offset..self.offset + self.len).map(move |i| self.byte_at(i))
    }
}

/// Signed byte distance between the starts of two views
impl Sub for EventBufferView<'_> {
    type Output = isize;

    fn sub(self, rhs: Self) -> isize {
        self.offset as isize - rhs.offset as isize
    }
}

/// MSB-first bit reader over a declared sequence of source fields.
///
/// Fields are pushed in reading order; `read` then returns bits starting at
/// the most significant bit of the first field pushed. Holds up to 128 bits.
#[derive(Debug, Clone, Default)]
pub struct BitReader {
    bits: u128,
    available: u32,
}

impl BitReader {
    const CAPACITY: u32 = 128;

    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `width` bits of `value`
    pub fn push(&mut self, value: u32, width: u32) -> &mut Self {
        debug_assert!(width <= 32 && self.available + width <= Self::CAPACITY);
        let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
        self.bits = (self.bits << width) | (value & mask) as u128;
        self.available += width;
        self
    }

    /// Take the next `width` bits, `None` when exhausted
    pub fn read(&mut self, width: u32) -> Option<u32> {
        if width > self.available || width > 32 {
            return None;
        }
        self.available -= width;
        let mask = if width == 32 { u32::MAX as u128 } else { (1u128 << width) - 1 };
        Some(((self.bits >> self.available) & mask) as u32)
    }

    /// Bits not yet read
    pub fn remaining(&self) -> u32 {
        self.available
    }
}
