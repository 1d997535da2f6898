//! Fixed-capacity write buffer for the chunk and event streams
//!
//! A [`ByteBuffer`] owns one contiguous byte region allocated up front and a
//! single cursor. Every write is all-or-nothing: when a value does not fit,
//! the buffer is left untouched and [`BufferError::BufferFull`] is returned so
//! the caller can flush and retry.
//!
//! Headers whose counts are only known after the body has been written use
//! [`ByteBuffer::patch_at`], which seeks back, rewrites, and restores the
//! cursor to the end of the body.

use byteorder::{ByteOrder, LittleEndian};
use glam::{Quat, Vec3};

/// Maximum number of characters in a length-prefixed string
pub const MAX_STRING_CHARS: usize = 100;

/// Errors produced while writing into a [`ByteBuffer`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("buffer full: needed {needed} bytes but only {remaining} remain")]
    BufferFull { needed: usize, remaining: usize },

    #[error("string of {len} characters exceeds the {max} character limit")]
    StringTooLong { len: usize, max: usize },

    #[error("cursor {offset} is outside the buffer (capacity {capacity})")]
    SeekOutOfRange { offset: usize, capacity: usize },
}

/// Fixed-capacity byte region with a settable cursor
pub struct ByteBuffer {
    data: Box<[u8]>,
    offset: usize,
}

impl ByteBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            offset: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current cursor position (also the number of valid bytes)
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    /// Bytes written so far
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.offset]
    }

    /// Move the cursor to `offset`
    ///
    /// Bytes past the new cursor are not cleared; they are overwritten by the
    /// next writes.
    pub fn seek(&mut self, offset: usize) -> Result<(), BufferError> {
        if offset > self.data.len() {
            return Err(BufferError::SeekOutOfRange {
                offset,
                capacity: self.data.len(),
            });
        }
        self.offset = offset;
        Ok(())
    }

    /// Discard everything written after `offset`
    ///
    /// Used to roll back a partially written record. Offsets past the cursor
    /// are ignored.
    pub fn truncate(&mut self, offset: usize) {
        if offset < self.offset {
            self.offset = offset;
        }
    }

    /// Reset the cursor to the start of the buffer
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Rewrite a region that was written earlier, then restore the cursor
    ///
    /// `f` runs with the cursor at `start`. Afterwards the cursor returns to
    /// where it was before the call, whether or not `f` succeeded. `f` must
    /// not write past the original cursor.
    pub fn patch_at<F>(&mut self, start: usize, f: F) -> Result<(), BufferError>
    where
        F: FnOnce(&mut Self) -> Result<(), BufferError>,
    {
        let end = self.offset;
        self.seek(start)?;
        let result = f(self);
        debug_assert!(
            result.is_err() || self.offset <= end,
            "patch wrote past the end of the body"
        );
        self.offset = end;
        result
    }

    // ========================================================================
    // Primitive writes
    // ========================================================================

    /// Reserve `len` bytes at the cursor and advance past them
    fn claim(&mut self, len: usize) -> Result<&mut [u8], BufferError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(BufferError::BufferFull {
                needed: len,
                remaining,
            });
        }
        let start = self.offset;
        self.offset += len;
        Ok(&mut self.data[start..start + len])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.claim(1)?[0] = value;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), BufferError> {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), BufferError> {
        LittleEndian::write_u16(self.claim(2)?, value);
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), BufferError> {
        LittleEndian::write_i16(self.claim(2)?, value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), BufferError> {
        LittleEndian::write_u32(self.claim(4)?, value);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), BufferError> {
        LittleEndian::write_i32(self.claim(4)?, value);
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), BufferError> {
        LittleEndian::write_i64(self.claim(8)?, value);
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), BufferError> {
        LittleEndian::write_f32(self.claim(4)?, value);
        Ok(())
    }

    pub fn write_vec3(&mut self, value: Vec3) -> Result<(), BufferError> {
        let bytes = self.claim(12)?;
        LittleEndian::write_f32_into(&value.to_array(), bytes);
        Ok(())
    }

    /// Write a quaternion as `x, y, z, w`
    pub fn write_quat(&mut self, value: Quat) -> Result<(), BufferError> {
        let bytes = self.claim(16)?;
        LittleEndian::write_f32_into(&value.to_array(), bytes);
        Ok(())
    }

    /// Write a length-prefixed UTF-8 string
    ///
    /// The length is the byte count encoded as a 7-bit varint. Strings longer
    /// than [`MAX_STRING_CHARS`] characters are rejected before anything is
    /// written.
    pub fn write_str(&mut self, value: &str) -> Result<(), BufferError> {
        let chars = value.chars().count();
        if chars > MAX_STRING_CHARS {
            return Err(BufferError::StringTooLong {
                len: chars,
                max: MAX_STRING_CHARS,
            });
        }

        let mut prefix = [0u8; 5];
        let prefix_len = encode_varint(value.len() as u32, &mut prefix);
        let bytes = self.claim(prefix_len + value.len())?;
        bytes[..prefix_len].copy_from_slice(&prefix[..prefix_len]);
        bytes[prefix_len..].copy_from_slice(value.as_bytes());
        Ok(())
    }

    /// Write bytes verbatim, without a length prefix
    ///
    /// Used for text framing such as the JSON event batch.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.claim(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }
}

/// Encode `value` as a 7-bit varint, returning the number of bytes used
fn encode_varint(mut value: u32, out: &mut [u8; 5]) -> usize {
    let mut len = 0;
    while value >= 0x80 {
        out[len] = (value as u8) | 0x80;
        value >>= 7;
        len += 1;
    }
    out[len] = value as u8;
    len + 1
}
