//! Replay stream decoder
//!
//! Reads a byte stream of one or more chunks and rebuilds the full state of
//! every tracked object at every tick. Delta entries are expanded against the
//! previous tick, objects that were not written are carried forward, and
//! destroyed instances drop out of the carried state.
//!
//! Decoding never fails outright. A truncated or corrupt stream stops at the
//! first bad record; every tick decoded before it is returned along with the
//! error.

use glam::{Quat, Vec3};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use tracing::{debug, warn};

use crate::config::LogLevel;

use super::binary::{
    ChunkHeader, DecodeError, DestroyObjectEntry, ObjectEntry, TickEntry, VrHeader, WireReader,
    WireRecord,
};

/// One tick with the reconstructed state of every live object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedTick {
    pub tick: TickEntry,
    pub objects: BTreeMap<u32, ObjectEntry>,
    /// Instance ids destroyed during this tick
    pub destroyed: Vec<u32>,
}

/// Result of decoding a stream
#[derive(Debug, Default, Serialize)]
pub struct DecodedReplay {
    /// Header of the first chunk
    pub header: Option<ChunkHeader>,
    pub vr_header: Option<VrHeader>,
    pub chunks: usize,
    pub ticks: Vec<DecodedTick>,
    /// First error encountered, if the stream did not decode fully
    #[serde(skip)]
    pub error: Option<DecodeError>,
}

impl DecodedReplay {
    /// Whether the whole stream decoded without error
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Transform copied into the previous tick when an object reappears
struct Backfill {
    instance_id: u32,
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
}

/// Stream decoder
#[derive(Debug, Clone)]
pub struct ReplayDecoder {
    expected_max_objects: usize,
    log_level: LogLevel,
}

impl Default for ReplayDecoder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EXPECTED_MAX_TRACKED_OBJECTS)
    }
}

impl ReplayDecoder {
    /// Create a decoder; ticks with more than `expected_max_objects` live
    /// objects log a one-time warning.
    pub fn new(expected_max_objects: usize) -> Self {
        Self {
            expected_max_objects,
            log_level: LogLevel::default(),
        }
    }

    /// Level gating the decoder's warnings
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    fn warns(&self) -> bool {
        self.log_level.allows(LogLevel::Warning)
    }

    pub fn decode(&self, bytes: &[u8]) -> DecodedReplay {
        self.decode_from(bytes)
    }

    /// Decode everything readable from `reader`
    pub fn decode_from<R: BufRead>(&self, reader: R) -> DecodedReplay {
        let mut reader = WireReader::new(reader);
        let mut replay = DecodedReplay::default();

        if let Err(e) = self.decode_stream(&mut reader, &mut replay) {
            if self.warns() {
                warn!(
                    position = reader.position(),
                    ticks = replay.ticks.len(),
                    "Replay decoding stopped early: {}",
                    e
                );
            }
            replay.error = Some(e);
        }
        replay
    }

    fn decode_stream<R: BufRead>(
        &self,
        reader: &mut WireReader<R>,
        replay: &mut DecodedReplay,
    ) -> Result<(), DecodeError> {
        let mut carry: BTreeMap<u32, ObjectEntry> = BTreeMap::new();
        let mut warned_size = false;

        loop {
            if replay.chunks > 0 && reader.at_end()? {
                break;
            }

            let header = ChunkHeader::decode(reader)?;
            header.validate()?;
            if replay.header.is_none() {
                replay.vr_header = Some(VrHeader::decode(reader)?);
                replay.header = Some(header.clone());
            }
            replay.chunks += 1;
            debug!(
                chunk = replay.chunks,
                ticks = header.num_ticks,
                "Decoding chunk"
            );

            for _ in 0..header.num_ticks.max(0) {
                let decoded = Self::decode_tick(reader, &mut carry, replay.ticks.last_mut())?;
                if !warned_size && decoded.objects.len() > self.expected_max_objects {
                    if self.warns() {
                        warn!(
                            objects = decoded.objects.len(),
                            expected = self.expected_max_objects,
                            "Replay tracks more objects than expected"
                        );
                    }
                    warned_size = true;
                }
                replay.ticks.push(decoded);
            }
        }
        Ok(())
    }

    /// Decode one tick and expand it against `carry`
    ///
    /// `carry` is only updated once the whole tick has been read, so a tick
    /// that fails halfway leaves the previous state intact.
    fn decode_tick<R: BufRead>(
        reader: &mut WireReader<R>,
        carry: &mut BTreeMap<u32, ObjectEntry>,
        previous: Option<&mut DecodedTick>,
    ) -> Result<DecodedTick, DecodeError> {
        let tick = TickEntry::decode(reader)?;

        let mut explicit = BTreeMap::new();
        let mut backfills = Vec::new();
        for _ in 0..tick.num_objects {
            let mut entry = ObjectEntry::decode(reader)?;
            if let Some(prev) = carry.get(&entry.instance_id) {
                if let Some(backfill) = merge_with_previous(&mut entry, prev) {
                    backfills.push(backfill);
                }
            }
            explicit.insert(entry.instance_id, entry);
        }

        let mut destroyed = Vec::with_capacity(tick.num_deleted as usize);
        for _ in 0..tick.num_deleted {
            destroyed.push(DestroyObjectEntry::decode(reader)?.instance_id);
        }

        // The tick is complete; commit it
        if let Some(previous) = previous {
            for fill in backfills {
                if let Some(obj) = previous.objects.get_mut(&fill.instance_id) {
                    obj.position = fill.position;
                    obj.rotation = fill.rotation;
                    obj.scale = fill.scale;
                }
            }
        }

        let destroyed_set: BTreeSet<u32> = destroyed.iter().copied().collect();
        let mut objects: BTreeMap<u32, ObjectEntry> = carry
            .iter()
            .filter(|(id, _)| !explicit.contains_key(id) && !destroyed_set.contains(id))
            .map(|(&id, prev)| (id, carried_copy(prev)))
            .collect();
        objects.extend(explicit);

        carry.clone_from(&objects);
        carry.retain(|id, _| !destroyed_set.contains(id));

        Ok(DecodedTick {
            tick,
            objects,
            destroyed,
        })
    }
}

/// Copy of last tick's state for an object that was not written this tick
fn carried_copy(prev: &ObjectEntry) -> ObjectEntry {
    let mut entry = prev.clone();
    entry.new_pos = false;
    entry.new_rot = false;
    entry.new_scale = false;
    entry.triggers.clear();
    entry
}

/// Fill fields `entry` left unchanged from the previous tick's state
///
/// Returns a backfill when the object was inactive last tick and is active
/// now, so the previous tick can be moved to the new pose.
fn merge_with_previous(entry: &mut ObjectEntry, prev: &ObjectEntry) -> Option<Backfill> {
    if entry.active {
        if !entry.new_pos {
            entry.position = prev.position;
        }
        if !entry.new_rot {
            entry.rotation = prev.rotation;
        }
        if !entry.new_scale {
            entry.scale = prev.scale;
        }
    } else {
        entry.position = prev.position;
        entry.rotation = prev.rotation;
        entry.scale = prev.scale;
    }

    carry_missing(&mut entry.floats, &prev.floats);
    carry_missing(&mut entry.ints, &prev.ints);
    carry_missing(&mut entry.bools, &prev.bools);
    carry_missing(&mut entry.texts, &prev.texts);
    carry_missing(&mut entry.left_hand, &prev.left_hand);
    carry_missing(&mut entry.right_hand, &prev.right_hand);

    (entry.active && !prev.active).then(|| Backfill {
        instance_id: entry.instance_id,
        position: entry.position,
        rotation: entry.rotation,
        scale: entry.scale,
    })
}

fn carry_missing<K: Ord + Clone, V: Clone>(current: &mut BTreeMap<K, V>, prev: &BTreeMap<K, V>) {
    for (key, value) in prev {
        if !current.contains_key(key) {
            current.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteBuffer;
    use crate::replay::binary::ProtocolError;

    /// Hand-assembled stream builder
    struct StreamBuilder {
        buf: ByteBuffer,
        first: bool,
    }

    impl StreamBuilder {
        fn new() -> Self {
            Self {
                buf: ByteBuffer::with_capacity(1 << 16),
                first: true,
            }
        }

        fn chunk(&mut self, ticks: Vec<(TickEntry, Vec<ObjectEntry>, Vec<u32>)>) -> &mut Self {
            let mut header = ChunkHeader::new("test", 20);
            header.num_ticks = ticks.len() as i32;
            header.encode(&mut self.buf).unwrap();
            if self.first {
                VrHeader::default().encode(&mut self.buf).unwrap();
                self.first = false;
            }
            for (mut tick, objects, destroyed) in ticks {
                tick.num_objects = objects.len() as u16;
                tick.num_deleted = destroyed.len() as u16;
                tick.encode(&mut self.buf).unwrap();
                for obj in &objects {
                    obj.encode(&mut self.buf).unwrap();
                }
                for id in destroyed {
                    DestroyObjectEntry { instance_id: id }
                        .encode(&mut self.buf)
                        .unwrap();
                }
            }
            self
        }

        fn bytes(&self) -> Vec<u8> {
            self.buf.as_slice().to_vec()
        }
    }

    fn tick(time: i64) -> TickEntry {
        TickEntry {
            time_ticks: time,
            ..Default::default()
        }
    }

    fn moved(id: u32, pos: Vec3) -> ObjectEntry {
        let mut entry = ObjectEntry::new(id, 1, 0);
        entry.new_pos = true;
        entry.position = pos;
        entry
    }

    #[test]
    fn test_unchanged_objects_are_carried_forward() {
        let mut first = moved(5, Vec3::new(1.0, 2.0, 3.0));
        first.new_rot = true;
        first.new_scale = true;
        first.floats.insert(1, 0.5);

        let bytes = StreamBuilder::new()
            .chunk(vec![
                (tick(1), vec![first], vec![]),
                (tick(2), vec![], vec![]),
            ])
            .bytes();

        let replay = ReplayDecoder::default().decode(&bytes);
        assert!(replay.is_complete());
        assert_eq!(replay.ticks.len(), 2);
        let carried = &replay.ticks[1].objects[&5];
        assert_eq!(carried.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(carried.floats.get(&1), Some(&0.5));
        assert!(!carried.new_pos);
    }

    #[test]
    fn test_partial_delta_fills_from_previous_tick() {
        let mut first = moved(5, Vec3::X);
        first.new_rot = true;
        first.rotation = Quat::from_rotation_y(1.0);
        first.ints.insert(1, 10);
        first.ints.insert(2, 20);

        let mut second = moved(5, Vec3::Y);
        second.ints.insert(2, 21);

        let bytes = StreamBuilder::new()
            .chunk(vec![
                (tick(1), vec![first], vec![]),
                (tick(2), vec![second], vec![]),
            ])
            .bytes();

        let replay = ReplayDecoder::default().decode(&bytes);
        let obj = &replay.ticks[1].objects[&5];
        assert_eq!(obj.position, Vec3::Y);
        assert_eq!(obj.rotation, Quat::from_rotation_y(1.0));
        assert_eq!(obj.ints.get(&1), Some(&10));
        assert_eq!(obj.ints.get(&2), Some(&21));
    }

    #[test]
    fn test_triggers_are_not_carried() {
        let mut first = moved(5, Vec3::X);
        first.triggers.insert(3);
        let bytes = StreamBuilder::new()
            .chunk(vec![
                (tick(1), vec![first], vec![]),
                (tick(2), vec![], vec![]),
            ])
            .bytes();

        let replay = ReplayDecoder::default().decode(&bytes);
        assert!(replay.ticks[0].objects[&5].triggers.contains(&3));
        assert!(replay.ticks[1].objects[&5].triggers.is_empty());
    }

    #[test]
    fn test_destroy_removes_carried_object() {
        let bytes = StreamBuilder::new()
            .chunk(vec![
                (tick(1), vec![moved(5, Vec3::X), moved(6, Vec3::Y)], vec![]),
                (tick(2), vec![], vec![5]),
                (tick(3), vec![], vec![]),
            ])
            .bytes();

        let replay = ReplayDecoder::default().decode(&bytes);
        assert!(!replay.ticks[1].objects.contains_key(&5));
        assert_eq!(replay.ticks[1].destroyed, vec![5]);
        assert!(!replay.ticks[2].objects.contains_key(&5));
        assert!(replay.ticks[2].objects.contains_key(&6));
    }

    #[test]
    fn test_move_and_destroy_in_same_tick() {
        let bytes = StreamBuilder::new()
            .chunk(vec![
                (tick(1), vec![moved(5, Vec3::new(1.0, 2.0, 3.0))], vec![]),
                (tick(2), vec![], vec![]),
                (tick(3), vec![moved(5, Vec3::new(4.0, 5.0, 6.0))], vec![5]),
                (tick(4), vec![], vec![]),
            ])
            .bytes();

        let replay = ReplayDecoder::default().decode(&bytes);
        assert_eq!(replay.ticks[1].objects[&5].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(replay.ticks[2].objects[&5].position, Vec3::new(4.0, 5.0, 6.0));
        assert!(!replay.ticks[3].objects.contains_key(&5));
    }

    #[test]
    fn test_reactivation_backfills_previous_tick() {
        let mut hidden = ObjectEntry::new(5, 1, 0);
        hidden.active = false;

        let bytes = StreamBuilder::new()
            .chunk(vec![
                (tick(1), vec![moved(5, Vec3::X)], vec![]),
                (tick(2), vec![hidden], vec![]),
                (tick(3), vec![moved(5, Vec3::Z)], vec![]),
            ])
            .bytes();

        let replay = ReplayDecoder::default().decode(&bytes);
        // Inactive tick was first held at the old pose, then moved to the new one
        assert!(!replay.ticks[1].objects[&5].active);
        assert_eq!(replay.ticks[1].objects[&5].position, Vec3::Z);
        assert_eq!(replay.ticks[0].objects[&5].position, Vec3::X);
        assert_eq!(replay.ticks[2].objects[&5].position, Vec3::Z);
    }

    #[test]
    fn test_inactive_entry_holds_transform() {
        let mut hidden = ObjectEntry::new(5, 1, 0);
        hidden.active = false;
        let bytes = StreamBuilder::new()
            .chunk(vec![
                (tick(1), vec![moved(5, Vec3::X)], vec![]),
                (tick(2), vec![hidden], vec![]),
            ])
            .bytes();

        let replay = ReplayDecoder::default().decode(&bytes);
        assert_eq!(replay.ticks[1].objects[&5].position, Vec3::X);
    }

    #[test]
    fn test_multiple_chunks_keep_state() {
        let bytes = StreamBuilder::new()
            .chunk(vec![(tick(1), vec![moved(5, Vec3::X)], vec![])])
            .chunk(vec![(tick(2), vec![moved(6, Vec3::Y)], vec![])])
            .chunk(vec![])
            .bytes();

        let replay = ReplayDecoder::default().decode(&bytes);
        assert!(replay.is_complete());
        assert_eq!(replay.chunks, 3);
        assert_eq!(replay.ticks.len(), 2);
        assert_eq!(replay.ticks[1].objects.len(), 2);
    }

    #[test]
    fn test_truncated_stream_returns_decoded_prefix() {
        let bytes = StreamBuilder::new()
            .chunk(vec![
                (tick(1), vec![moved(5, Vec3::X)], vec![]),
                (tick(2), vec![moved(5, Vec3::Y)], vec![]),
            ])
            .bytes();

        // Cut into the second tick's object entry
        let cut = &bytes[..bytes.len() - 3];
        let replay = ReplayDecoder::default().decode(cut);
        assert_eq!(replay.ticks.len(), 1);
        assert!(matches!(replay.error, Some(DecodeError::EndOfStream { .. })));
    }

    #[test]
    fn test_bad_endianness_is_protocol_error() {
        let mut bytes = StreamBuilder::new()
            .chunk(vec![(tick(1), vec![], vec![])])
            .bytes();
        bytes[0] = 0;
        bytes[1] = 1;

        let replay = ReplayDecoder::default().decode(&bytes);
        assert!(replay.ticks.is_empty());
        assert!(matches!(
            replay.error,
            Some(DecodeError::Protocol(ProtocolError::BadEndianness(256)))
        ));
    }

    #[test]
    fn test_unsupported_version_in_later_chunk() {
        let mut builder = StreamBuilder::new();
        builder.chunk(vec![(tick(1), vec![moved(5, Vec3::X)], vec![])]);
        let second_chunk = builder.buf.offset();
        builder.chunk(vec![(tick(2), vec![], vec![])]);
        let mut bytes = builder.bytes();
        bytes[second_chunk + 2] = 9;

        let replay = ReplayDecoder::default().decode(&bytes);
        assert_eq!(replay.ticks.len(), 1);
        assert!(matches!(
            replay.error,
            Some(DecodeError::Protocol(ProtocolError::UnsupportedVersion(9)))
        ));
    }

    #[test]
    fn test_corrupt_string_length_stops_decoding() {
        let bytes = [1u8, 0, 1, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
        let replay = ReplayDecoder::default().decode(&bytes);
        assert!(replay.header.is_none());
        assert!(matches!(
            replay.error,
            Some(DecodeError::InvalidString { position: 4 })
        ));
    }

    #[test]
    fn test_log_level_does_not_change_results() {
        let bytes = StreamBuilder::new()
            .chunk(vec![(tick(1), vec![moved(5, Vec3::X), moved(6, Vec3::Y)], vec![])])
            .bytes();
        let quiet = ReplayDecoder::new(1).with_log_level(LogLevel::None);
        assert!(!quiet.warns());
        assert!(ReplayDecoder::new(1).warns());

        let replay = quiet.decode(&bytes[..bytes.len() - 1]);
        assert_eq!(replay.chunks, 1);
        assert!(replay.ticks.is_empty());
        assert!(matches!(replay.error, Some(DecodeError::EndOfStream { .. })));
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let replay = ReplayDecoder::default().decode(&[]);
        assert!(replay.header.is_none());
        assert!(!replay.is_complete());
    }
}
