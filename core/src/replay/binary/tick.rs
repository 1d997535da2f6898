//! Tick and destroy records

use serde::{Deserialize, Serialize};
use std::io::BufRead;

use super::{DecodeError, WireReader, WireRecord};
use crate::buffer::{BufferError, ByteBuffer};

bitflags::bitflags! {
    /// Tick header flags
    ///
    /// Each of the optional flags announces a trailing field after the fixed
    /// part of the tick header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TickFlags: u8 {
        /// Scene name follows
        const NEW_SCENE = 1 << 0;
        /// The user is in immersive mode
        const IMMERSION = 1 << 1;
        /// Event name follows
        const EVENT = 1 << 2;
        /// Skybox name follows
        const NEW_SKYBOX = 1 << 3;
        /// Frame rate value follows
        const NEW_FPS = 1 << 4;
    }
}

/// Header of one tick
///
/// `num_objects` and `num_deleted` are placeholders until the tick body has
/// been written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickEntry {
    pub time_ticks: i64,
    pub unscaled_time: f32,
    pub delta_time: f32,
    pub handle_tick_time: f32,
    pub num_objects: u16,
    pub num_deleted: u16,
    pub is_immersion: bool,
    pub scene_name: Option<String>,
    pub event_name: Option<String>,
    pub skybox_name: Option<String>,
    pub fps: Option<i32>,
}

impl TickEntry {
    pub fn flags(&self) -> TickFlags {
        let mut flags = TickFlags::empty();
        flags.set(TickFlags::NEW_SCENE, self.scene_name.is_some());
        flags.set(TickFlags::IMMERSION, self.is_immersion);
        flags.set(TickFlags::EVENT, self.event_name.is_some());
        flags.set(TickFlags::NEW_SKYBOX, self.skybox_name.is_some());
        flags.set(TickFlags::NEW_FPS, self.fps.is_some());
        flags
    }
}

impl WireRecord for TickEntry {
    fn encode(&self, buf: &mut ByteBuffer) -> Result<(), BufferError> {
        buf.write_u8(self.flags().bits())?;
        buf.write_i64(self.time_ticks)?;
        buf.write_f32(self.unscaled_time)?;
        buf.write_f32(self.delta_time)?;
        buf.write_f32(self.handle_tick_time)?;
        buf.write_u16(self.num_objects)?;
        buf.write_u16(self.num_deleted)?;

        if let Some(scene) = &self.scene_name {
            buf.write_str(scene)?;
        }
        if let Some(event) = &self.event_name {
            buf.write_str(event)?;
        }
        if let Some(skybox) = &self.skybox_name {
            buf.write_str(skybox)?;
        }
        if let Some(fps) = self.fps {
            buf.write_i32(fps)?;
        }
        Ok(())
    }

    fn decode<R: BufRead>(reader: &mut WireReader<R>) -> Result<Self, DecodeError> {
        let flags = TickFlags::from_bits_truncate(reader.read_u8()?);
        let mut entry = Self {
            time_ticks: reader.read_i64()?,
            unscaled_time: reader.read_f32()?,
            delta_time: reader.read_f32()?,
            handle_tick_time: reader.read_f32()?,
            num_objects: reader.read_u16()?,
            num_deleted: reader.read_u16()?,
            is_immersion: flags.contains(TickFlags::IMMERSION),
            ..Default::default()
        };

        if flags.contains(TickFlags::NEW_SCENE) {
            entry.scene_name = Some(reader.read_string()?);
        }
        if flags.contains(TickFlags::EVENT) {
            entry.event_name = Some(reader.read_string()?);
        }
        if flags.contains(TickFlags::NEW_SKYBOX) {
            entry.skybox_name = Some(reader.read_string()?);
        }
        if flags.contains(TickFlags::NEW_FPS) {
            entry.fps = Some(reader.read_i32()?);
        }
        Ok(entry)
    }
}

/// Marks an instance as no longer tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyObjectEntry {
    pub instance_id: u32,
}

impl WireRecord for DestroyObjectEntry {
    fn encode(&self, buf: &mut ByteBuffer) -> Result<(), BufferError> {
        buf.write_u32(self.instance_id)
    }

    fn decode<R: BufRead>(reader: &mut WireReader<R>) -> Result<Self, DecodeError> {
        Ok(Self {
            instance_id: reader.read_u32()?,
        })
    }
}
