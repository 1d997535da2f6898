//! Per-object delta record

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;

use super::{DecodeError, MAX_LIST_LEN, WireReader, WireRecord, list_len};
use crate::buffer::{BufferError, ByteBuffer};

bitflags::bitflags! {
    /// Object record flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u16 {
        const ACTIVE = 1 << 0;
        const ANIM_PARAMS = 1 << 1;
        const NEW_POS = 1 << 2;
        const NEW_ROT = 1 << 3;
        const NEW_SCALE = 1 << 4;
        const TEXTS = 1 << 5;
        const LEFT_HAND = 1 << 6;
        const RIGHT_HAND = 1 << 7;
        /// Position is the zero vector and is not written
        const DEFAULT_POS = 1 << 8;
        /// Rotation is the identity quaternion and is not written
        const DEFAULT_ROT = 1 << 9;
        /// Scale is one on every axis and is not written
        const DEFAULT_SCALE = 1 << 10;
    }
}

bitflags::bitflags! {
    /// Which animator parameter lists follow
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamFlags: u8 {
        const FLOATS = 1 << 0;
        const INTS = 1 << 1;
        const BOOLS = 1 << 2;
        const TRIGGERS = 1 << 3;
    }
}

/// Text shown by an object, keyed by the text component's instance id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEntry {
    pub text: String,
    pub size: f32,
}

/// Changes to one tracked object within a tick
///
/// When decoded straight from the wire, fields whose `new_*` flag is unset
/// hold identity values; the decoder later fills them from the previous tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub instance_id: u32,
    pub prefab_id: u16,
    pub parent_prefab_id: u16,
    pub active: bool,
    pub new_pos: bool,
    pub new_rot: bool,
    pub new_scale: bool,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub floats: BTreeMap<i32, f32>,
    pub ints: BTreeMap<i32, i32>,
    pub bools: BTreeMap<i32, bool>,
    pub triggers: BTreeSet<i32>,
    pub texts: BTreeMap<u32, TextEntry>,
    pub left_hand: BTreeMap<String, f32>,
    pub right_hand: BTreeMap<String, f32>,
}

impl ObjectEntry {
    /// Entry with identity transform and no deltas
    pub fn new(instance_id: u32, prefab_id: u16, parent_prefab_id: u16) -> Self {
        Self {
            instance_id,
            prefab_id,
            parent_prefab_id,
            active: true,
            new_pos: false,
            new_rot: false,
            new_scale: false,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            floats: BTreeMap::new(),
            ints: BTreeMap::new(),
            bools: BTreeMap::new(),
            triggers: BTreeSet::new(),
            texts: BTreeMap::new(),
            left_hand: BTreeMap::new(),
            right_hand: BTreeMap::new(),
        }
    }

    pub fn has_anim_params(&self) -> bool {
        !(self.floats.is_empty()
            && self.ints.is_empty()
            && self.bools.is_empty()
            && self.triggers.is_empty())
    }

    /// Flags as written on the wire
    ///
    /// Inactive entries carry only the fixed head, so their payload flags
    /// are never set.
    pub fn flags(&self) -> ObjectFlags {
        let mut flags = ObjectFlags::empty();
        flags.set(ObjectFlags::DEFAULT_POS, self.position == Vec3::ZERO);
        flags.set(ObjectFlags::DEFAULT_ROT, self.rotation == Quat::IDENTITY);
        flags.set(ObjectFlags::DEFAULT_SCALE, self.scale == Vec3::ONE);
        if !self.active {
            return flags;
        }

        flags |= ObjectFlags::ACTIVE;
        flags.set(ObjectFlags::ANIM_PARAMS, self.has_anim_params());
        flags.set(ObjectFlags::NEW_POS, self.new_pos);
        flags.set(ObjectFlags::NEW_ROT, self.new_rot);
        flags.set(ObjectFlags::NEW_SCALE, self.new_scale);
        flags.set(ObjectFlags::TEXTS, !self.texts.is_empty());
        flags.set(ObjectFlags::LEFT_HAND, !self.left_hand.is_empty());
        flags.set(ObjectFlags::RIGHT_HAND, !self.right_hand.is_empty());
        flags
    }

    /// First list longer than a u8 count can carry, with its length
    pub fn oversized_list(&self) -> Option<(&'static str, usize)> {
        [
            ("animator floats", self.floats.len()),
            ("animator ints", self.ints.len()),
            ("animator bools", self.bools.len()),
            ("animator triggers", self.triggers.len()),
            ("texts", self.texts.len()),
            ("left hand offsets", self.left_hand.len()),
            ("right hand offsets", self.right_hand.len()),
        ]
        .into_iter()
        .find(|&(_, len)| len > MAX_LIST_LEN)
    }

    fn param_flags(&self) -> ParamFlags {
        let mut flags = ParamFlags::empty();
        flags.set(ParamFlags::FLOATS, !self.floats.is_empty());
        flags.set(ParamFlags::INTS, !self.ints.is_empty());
        flags.set(ParamFlags::BOOLS, !self.bools.is_empty());
        flags.set(ParamFlags::TRIGGERS, !self.triggers.is_empty());
        flags
    }

    fn encode_anim_params(&self, buf: &mut ByteBuffer) -> Result<(), BufferError> {
        let flags = self.param_flags();
        buf.write_u8(flags.bits())?;

        if flags.contains(ParamFlags::FLOATS) {
            let len = list_len(self.floats.len());
            buf.write_u8(len)?;
            for (&id, &value) in self.floats.iter().take(len as usize) {
                buf.write_i32(id)?;
                buf.write_f32(value)?;
            }
        }
        if flags.contains(ParamFlags::INTS) {
            let len = list_len(self.ints.len());
            buf.write_u8(len)?;
            for (&id, &value) in self.ints.iter().take(len as usize) {
                buf.write_i32(id)?;
                buf.write_i32(value)?;
            }
        }
        if flags.contains(ParamFlags::BOOLS) {
            let len = list_len(self.bools.len());
            buf.write_u8(len)?;
            for (&id, &value) in self.bools.iter().take(len as usize) {
                buf.write_i32(id)?;
                buf.write_bool(value)?;
            }
        }
        if flags.contains(ParamFlags::TRIGGERS) {
            let len = list_len(self.triggers.len());
            buf.write_u8(len)?;
            for &id in self.triggers.iter().take(len as usize) {
                buf.write_i32(id)?;
            }
        }
        Ok(())
    }

    fn decode_anim_params<R: BufRead>(
        &mut self,
        reader: &mut WireReader<R>,
    ) -> Result<(), DecodeError> {
        let flags = ParamFlags::from_bits_truncate(reader.read_u8()?);

        if flags.contains(ParamFlags::FLOATS) {
            for _ in 0..reader.read_u8()? {
                let id = reader.read_i32()?;
                self.floats.insert(id, reader.read_f32()?);
            }
        }
        if flags.contains(ParamFlags::INTS) {
            for _ in 0..reader.read_u8()? {
                let id = reader.read_i32()?;
                self.ints.insert(id, reader.read_i32()?);
            }
        }
        if flags.contains(ParamFlags::BOOLS) {
            for _ in 0..reader.read_u8()? {
                let id = reader.read_i32()?;
                self.bools.insert(id, reader.read_bool()?);
            }
        }
        if flags.contains(ParamFlags::TRIGGERS) {
            for _ in 0..reader.read_u8()? {
                self.triggers.insert(reader.read_i32()?);
            }
        }
        Ok(())
    }
}

fn encode_hand(buf: &mut ByteBuffer, offsets: &BTreeMap<String, f32>) -> Result<(), BufferError> {
    let len = list_len(offsets.len());
    buf.write_u8(len)?;
    for (bone, &offset) in offsets.iter().take(len as usize) {
        buf.write_str(bone)?;
        buf.write_f32(offset)?;
    }
    Ok(())
}

fn decode_hand<R: BufRead>(
    reader: &mut WireReader<R>,
    offsets: &mut BTreeMap<String, f32>,
) -> Result<(), DecodeError> {
    for _ in 0..reader.read_u8()? {
        let bone = reader.read_string()?;
        offsets.insert(bone, reader.read_f32()?);
    }
    Ok(())
}

impl WireRecord for ObjectEntry {
    fn encode(&self, buf: &mut ByteBuffer) -> Result<(), BufferError> {
        let flags = self.flags();
        buf.write_u16(flags.bits())?;
        buf.write_u32(self.instance_id)?;
        buf.write_u16(self.prefab_id)?;
        buf.write_u16(self.parent_prefab_id)?;

        if !self.active {
            return Ok(());
        }

        if flags.contains(ObjectFlags::NEW_POS) && !flags.contains(ObjectFlags::DEFAULT_POS) {
            buf.write_vec3(self.position)?;
        }
        if flags.contains(ObjectFlags::NEW_ROT) && !flags.contains(ObjectFlags::DEFAULT_ROT) {
            buf.write_quat(self.rotation)?;
        }
        if flags.contains(ObjectFlags::NEW_SCALE) && !flags.contains(ObjectFlags::DEFAULT_SCALE) {
            buf.write_vec3(self.scale)?;
        }

        if flags.contains(ObjectFlags::ANIM_PARAMS) {
            self.encode_anim_params(buf)?;
        }

        if flags.contains(ObjectFlags::TEXTS) {
            let len = list_len(self.texts.len());
            buf.write_u8(len)?;
            for (&id, entry) in self.texts.iter().take(len as usize) {
                buf.write_u32(id)?;
                buf.write_str(&entry.text)?;
                buf.write_f32(entry.size)?;
            }
        }

        if flags.contains(ObjectFlags::LEFT_HAND) {
            encode_hand(buf, &self.left_hand)?;
        }
        if flags.contains(ObjectFlags::RIGHT_HAND) {
            encode_hand(buf, &self.right_hand)?;
        }
        Ok(())
    }

    fn decode<R: BufRead>(reader: &mut WireReader<R>) -> Result<Self, DecodeError> {
        let flags = ObjectFlags::from_bits_truncate(reader.read_u16()?);
        let instance_id = reader.read_u32()?;
        let prefab_id = reader.read_u16()?;
        let parent_prefab_id = reader.read_u16()?;

        let mut entry = Self::new(instance_id, prefab_id, parent_prefab_id);
        entry.active = flags.contains(ObjectFlags::ACTIVE);
        if !entry.active {
            return Ok(entry);
        }

        entry.new_pos = flags.contains(ObjectFlags::NEW_POS);
        entry.new_rot = flags.contains(ObjectFlags::NEW_ROT);
        entry.new_scale = flags.contains(ObjectFlags::NEW_SCALE);

        if entry.new_pos && !flags.contains(ObjectFlags::DEFAULT_POS) {
            entry.position = reader.read_vec3()?;
        }
        if entry.new_rot && !flags.contains(ObjectFlags::DEFAULT_ROT) {
            entry.rotation = reader.read_quat()?;
        }
        if entry.new_scale && !flags.contains(ObjectFlags::DEFAULT_SCALE) {
            entry.scale = reader.read_vec3()?;
        }

        if flags.contains(ObjectFlags::ANIM_PARAMS) {
            entry.decode_anim_params(reader)?;
        }

        if flags.contains(ObjectFlags::TEXTS) {
            for _ in 0..reader.read_u8()? {
                let id = reader.read_u32()?;
                let text = reader.read_string()?;
                let size = reader.read_f32()?;
                entry.texts.insert(id, TextEntry { text, size });
            }
        }

        if flags.contains(ObjectFlags::LEFT_HAND) {
            decode_hand(reader, &mut entry.left_hand)?;
        }
        if flags.contains(ObjectFlags::RIGHT_HAND) {
            decode_hand(reader, &mut entry.right_hand)?;
        }
        Ok(entry)
    }
}
