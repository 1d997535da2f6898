//! Chunk and session header records

use serde::{Deserialize, Serialize};
use std::io::BufRead;

use super::{DecodeError, ProtocolError, WireReader, WireRecord};
use crate::buffer::{BufferError, ByteBuffer};
use crate::replay::types::Geolocation;

/// Endianness marker written at the start of every chunk
pub const ENDIANNESS_MARKER: i16 = 1;

/// The only format version this crate reads and writes
pub const FORMAT_VERSION: i16 = 1;

/// Header opening every chunk
///
/// `num_ticks` is written as a placeholder and patched once the chunk body
/// is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub endianness: i16,
    pub format_version: i16,
    pub app_version: String,
    pub tick_rate_hz: i16,
    pub num_ticks: i32,
}

impl ChunkHeader {
    /// Header for a new, empty chunk
    pub fn new(app_version: impl Into<String>, tick_rate_hz: i16) -> Self {
        Self {
            endianness: ENDIANNESS_MARKER,
            format_version: FORMAT_VERSION,
            app_version: app_version.into(),
            tick_rate_hz,
            num_ticks: 0,
        }
    }

    /// Check that the stream can be decoded by this version
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.endianness != ENDIANNESS_MARKER {
            return Err(ProtocolError::BadEndianness(self.endianness));
        }
        if self.format_version != FORMAT_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.format_version));
        }
        Ok(())
    }
}

impl WireRecord for ChunkHeader {
    fn encode(&self, buf: &mut ByteBuffer) -> Result<(), BufferError> {
        buf.write_i16(self.endianness)?;
        buf.write_i16(self.format_version)?;
        buf.write_str(&self.app_version)?;
        buf.write_i16(self.tick_rate_hz)?;
        buf.write_i32(self.num_ticks)
    }

    fn decode<R: BufRead>(reader: &mut WireReader<R>) -> Result<Self, DecodeError> {
        Ok(Self {
            endianness: reader.read_i16()?,
            format_version: reader.read_i16()?,
            app_version: reader.read_string()?,
            tick_rate_hz: reader.read_i16()?,
            num_ticks: reader.read_i32()?,
        })
    }
}

/// One-time session metadata written after the first chunk header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VrHeader {
    pub device_name: String,
    pub display_frequency: f32,
    pub pc_name: String,
    pub cpu_details: String,
    pub gpu_details: String,
    pub battery_level: f32,
    pub operating_system: String,
    pub memory_size: String,
    pub processor_frequency: String,
    pub city: String,
    pub country: String,
    pub region: String,
    pub latitude: f32,
    pub longitude: f32,
    pub engine: String,
    pub engine_version: String,
    pub project_name: String,
}

impl VrHeader {
    /// Fill the location fields
    pub fn set_geolocation(&mut self, location: &Geolocation) {
        self.city.clone_from(&location.city);
        self.country.clone_from(&location.country);
        self.region.clone_from(&location.region);
        self.latitude = location.latitude;
        self.longitude = location.longitude;
    }
}

impl WireRecord for VrHeader {
    fn encode(&self, buf: &mut ByteBuffer) -> Result<(), BufferError> {
        buf.write_str(&self.device_name)?;
        buf.write_f32(self.display_frequency)?;
        buf.write_str(&self.pc_name)?;
        buf.write_str(&self.cpu_details)?;
        buf.write_str(&self.gpu_details)?;
        buf.write_f32(self.battery_level)?;
        buf.write_str(&self.operating_system)?;
        buf.write_str(&self.memory_size)?;
        buf.write_str(&self.processor_frequency)?;
        buf.write_str(&self.city)?;
        buf.write_str(&self.country)?;
        buf.write_str(&self.region)?;
        buf.write_f32(self.latitude)?;
        buf.write_f32(self.longitude)?;
        buf.write_str(&self.engine)?;
        buf.write_str(&self.engine_version)?;
        buf.write_str(&self.project_name)
    }

    fn decode<R: BufRead>(reader: &mut WireReader<R>) -> Result<Self, DecodeError> {
        Ok(Self {
            device_name: reader.read_string()?,
            display_frequency: reader.read_f32()?,
            pc_name: reader.read_string()?,
            cpu_details: reader.read_string()?,
            gpu_details: reader.read_string()?,
            battery_level: reader.read_f32()?,
            operating_system: reader.read_string()?,
            memory_size: reader.read_string()?,
            processor_frequency: reader.read_string()?,
            city: reader.read_string()?,
            country: reader.read_string()?,
            region: reader.read_string()?,
            latitude: reader.read_f32()?,
            longitude: reader.read_f32()?,
            engine: reader.read_string()?,
            engine_version: reader.read_string()?,
            project_name: reader.read_string()?,
        })
    }
}
