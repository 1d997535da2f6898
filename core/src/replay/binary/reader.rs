//! Forward-only reader for the chunk stream
//!
//! Mirrors [`ByteBuffer`](crate::buffer::ByteBuffer) on the decode side:
//! little-endian primitives, 7-bit length-prefixed strings, single-byte
//! bools. There is no seeking; records are consumed in stream order.

use byteorder::{LittleEndian, ReadBytesExt};
use glam::{Quat, Vec3};
use std::io::{self, BufRead};

use crate::buffer::MAX_STRING_CHARS;

use super::DecodeError;

/// Longest encoded string in bytes (every char at its widest UTF-8 form)
const MAX_STRING_BYTES: usize = MAX_STRING_CHARS * 4;

/// Sequential reader over a buffered byte source
pub struct WireReader<R: BufRead> {
    reader: R,
    position: u64,
}

impl<R: BufRead> WireReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
        }
    }

    /// Number of bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the source has no more bytes
    pub fn at_end(&mut self) -> Result<bool, DecodeError> {
        match self.reader.fill_buf() {
            Ok(buf) => Ok(buf.is_empty()),
            Err(e) => Err(DecodeError::Io(e)),
        }
    }

    fn map_err(&self, err: io::Error) -> DecodeError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::EndOfStream {
                position: self.position,
            }
        } else {
            DecodeError::Io(err)
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = self.reader.read_u8().map_err(|e| self.map_err(e))?;
        self.position += 1;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool {
                value: other,
                position: self.position - 1,
            }),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let v = self
            .reader
            .read_u16::<LittleEndian>()
            .map_err(|e| self.map_err(e))?;
        self.position += 2;
        Ok(v)
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        let v = self
            .reader
            .read_i16::<LittleEndian>()
            .map_err(|e| self.map_err(e))?;
        self.position += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let v = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| self.map_err(e))?;
        self.position += 4;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let v = self
            .reader
            .read_i32::<LittleEndian>()
            .map_err(|e| self.map_err(e))?;
        self.position += 4;
        Ok(v)
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let v = self
            .reader
            .read_i64::<LittleEndian>()
            .map_err(|e| self.map_err(e))?;
        self.position += 8;
        Ok(v)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        let v = self
            .reader
            .read_f32::<LittleEndian>()
            .map_err(|e| self.map_err(e))?;
        self.position += 4;
        Ok(v)
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, DecodeError> {
        let mut v = [0f32; 3];
        self.reader
            .read_f32_into::<LittleEndian>(&mut v)
            .map_err(|e| self.map_err(e))?;
        self.position += 12;
        Ok(Vec3::from_array(v))
    }

    /// Read a quaternion stored as `x, y, z, w`
    pub fn read_quat(&mut self) -> Result<Quat, DecodeError> {
        let mut v = [0f32; 4];
        self.reader
            .read_f32_into::<LittleEndian>(&mut v)
            .map_err(|e| self.map_err(e))?;
        self.position += 16;
        Ok(Quat::from_array(v))
    }

    /// Read a 7-bit varint length followed by that many UTF-8 bytes
    ///
    /// Lengths no encoder can produce are rejected before allocating.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.position;
        let len = self.read_varint()? as usize;
        if len > MAX_STRING_BYTES {
            return Err(DecodeError::InvalidString { position: start });
        }

        let mut bytes = vec![0u8; len];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| self.map_err(e))?;
        self.position += len as u64;

        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidString { position: start })
    }

    fn read_varint(&mut self) -> Result<u32, DecodeError> {
        let start = self.position;
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::InvalidString { position: start })
    }
}
