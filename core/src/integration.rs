//! Integration tests for the Insight recorder
//!
//! Drives randomized sessions through the full pipeline (producer, worker
//! thread, uploader, decoder) and checks the decoded history against what
//! the producer submitted.

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    use glam::{Quat, Vec3};
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;
    use tempfile::tempdir;

    use crate::config::RecorderConfig;
    use crate::replay::binary::{DecodeError, VrHeader};
    use crate::replay::decoder::{DecodedReplay, ReplayDecoder};
    use crate::replay::runtime::Recorder;
    use crate::test_utils::MemoryTransport;

    // ============================================================================
    // Simulated Scene
    // ============================================================================

    /// Producer-side state of one tracked object
    #[derive(Debug, Clone, PartialEq)]
    struct SimObject {
        active: bool,
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
        floats: BTreeMap<i32, f32>,
        ints: BTreeMap<i32, i32>,
        bools: BTreeMap<i32, bool>,
        left_hand: BTreeMap<String, f32>,
    }

    impl SimObject {
        fn random(rng: &mut Pcg64) -> Self {
            Self {
                active: true,
                position: random_vec(rng),
                rotation: Quat::from_rotation_y(rng.random_range(0.0..6.0)),
                scale: Vec3::splat(rng.random_range(0.5..2.0)),
                floats: BTreeMap::from([(1, rng.random_range(0.0..1.0))]),
                ints: BTreeMap::from([(2, rng.random_range(0..5))]),
                bools: BTreeMap::from([(3, rng.random_bool(0.5))]),
                left_hand: BTreeMap::from([("thumb".to_string(), rng.random_range(0.0..1.0))]),
            }
        }

        fn step(&mut self, rng: &mut Pcg64) {
            if rng.random_bool(0.08) {
                self.active = !self.active;
            }
            // Identity transforms are elided on the wire
            if rng.random_bool(0.05) {
                self.position = Vec3::ZERO;
                self.rotation = Quat::IDENTITY;
                self.scale = Vec3::ONE;
                return;
            }
            if rng.random_bool(0.5) {
                self.position = random_vec(rng);
            }
            if rng.random_bool(0.2) {
                self.rotation = Quat::from_rotation_y(rng.random_range(0.0..6.0));
            }
            if rng.random_bool(0.1) {
                self.scale = Vec3::splat(rng.random_range(0.5..2.0));
            }
            if rng.random_bool(0.3) {
                self.floats.insert(1, rng.random_range(0.0..1.0));
            }
            if rng.random_bool(0.1) {
                self.ints.insert(2, rng.random_range(0..5));
            }
            if rng.random_bool(0.1) {
                self.bools.insert(3, rng.random_bool(0.5));
            }
            if rng.random_bool(0.2) {
                self.left_hand.insert("thumb".into(), rng.random_range(0.0..1.0));
            }
        }
    }

    fn random_vec(rng: &mut Pcg64) -> Vec3 {
        Vec3::new(
            rng.random_range(-10.0..10.0),
            rng.random_range(0.0..3.0),
            rng.random_range(-10.0..10.0),
        )
    }

    /// Everything the producer submitted, tick by tick
    struct Session {
        ticks: Vec<BTreeMap<u32, SimObject>>,
        /// Tick index at which each id was destroyed
        destroyed_at: BTreeMap<u32, usize>,
    }

    /// Record `tick_count` random ticks and return the uploaded stream
    fn record_session(seed: u64, tick_count: usize, buffer_capacity: usize) -> (Session, Vec<u8>) {
        let dir = tempdir().unwrap();
        let config = RecorderConfig {
            replay_buffer_capacity: buffer_capacity,
            expected_max_ticks_in_flight: tick_count + 1,
            geolocation_wait_ms: 0,
            flush_interval_ms: 60_000,
            retry_interval_secs: 3600,
            failed_chunks_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let transport = Arc::new(MemoryTransport::new());
        let mut recorder = Recorder::new(config, VrHeader::default(), transport.clone());
        recorder.start().unwrap();

        let mut rng = Pcg64::seed_from_u64(seed);
        let mut live: BTreeMap<u32, SimObject> =
            (100..112).map(|id| (id, SimObject::random(&mut rng))).collect();
        let mut session = Session {
            ticks: Vec::with_capacity(tick_count),
            destroyed_at: BTreeMap::new(),
        };

        for index in 0..tick_count {
            let mut tick = recorder.begin_tick(index as i64 * 500_000, index as f32 * 0.05, 0.05);

            let mut destroyed = Vec::new();
            if index > 0 && rng.random_bool(0.05) {
                if let Some(&id) = live.keys().next() {
                    live.remove(&id);
                    destroyed.push(id);
                }
            }

            for (&id, obj) in live.iter_mut() {
                if index > 0 {
                    obj.step(&mut rng);
                }
                let snapshot = recorder.add_tracked_object(&mut tick, id, (id % 7) as u16, 0);
                snapshot.active = obj.active;
                snapshot.set_transform(obj.position, obj.rotation, obj.scale);
                snapshot.anim.floats.clone_from(&obj.floats);
                snapshot.anim.ints.clone_from(&obj.ints);
                snapshot.anim.bools.clone_from(&obj.bools);
                snapshot.left_hand.clone_from(&obj.left_hand);
            }
            for &id in &destroyed {
                recorder.destroy_object(&mut tick, id);
                session.destroyed_at.insert(id, index);
            }
            assert!(recorder.end_tick(tick));
            session.ticks.push(live.clone());
        }

        recorder.stop().unwrap();
        assert_eq!(recorder.stats().ticks_dropped, 0);
        (session, transport.stream())
    }

    fn assert_matches(session: &Session, replay: &DecodedReplay) {
        assert_eq!(replay.ticks.len(), session.ticks.len());

        for (index, (expected, decoded)) in session.ticks.iter().zip(&replay.ticks).enumerate() {
            for (id, obj) in expected {
                let entry = decoded
                    .objects
                    .get(id)
                    .unwrap_or_else(|| panic!("tick {index}: object {id} missing"));
                assert_eq!(entry.active, obj.active, "tick {index}: object {id} active");
                if !obj.active {
                    continue;
                }
                assert_eq!(entry.position, obj.position, "tick {index}: object {id} position");
                assert_eq!(entry.rotation, obj.rotation, "tick {index}: object {id} rotation");
                assert_eq!(entry.scale, obj.scale, "tick {index}: object {id} scale");
                assert_eq!(entry.floats, obj.floats, "tick {index}: object {id} floats");
                assert_eq!(entry.ints, obj.ints, "tick {index}: object {id} ints");
                assert_eq!(entry.bools, obj.bools, "tick {index}: object {id} bools");
                assert_eq!(entry.left_hand, obj.left_hand, "tick {index}: object {id} hand");
            }

            let gone: BTreeSet<u32> = session
                .destroyed_at
                .iter()
                .filter(|&(_, &at)| at <= index)
                .map(|(&id, _)| id)
                .collect();
            for id in gone {
                assert!(
                    !decoded.objects.contains_key(&id),
                    "tick {index}: destroyed object {id} still present"
                );
            }
        }
    }

    // ============================================================================
    // Round Trips
    // ============================================================================

    #[test]
    fn test_random_session_round_trip() {
        let (session, stream) = record_session(7, 120, 1024 * 1024);
        let replay = ReplayDecoder::default().decode(&stream);
        assert!(replay.is_complete(), "decode failed: {:?}", replay.error);
        assert_eq!(replay.chunks, 3);
        assert_matches(&session, &replay);
    }

    #[test]
    fn test_random_session_across_many_chunks() {
        let (session, stream) = record_session(42, 150, 4096);
        let replay = ReplayDecoder::default().decode(&stream);
        assert!(replay.is_complete(), "decode failed: {:?}", replay.error);
        assert!(replay.chunks > 5);
        assert_matches(&session, &replay);
    }

    #[test]
    fn test_identity_pose_round_trips_exactly() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig {
            geolocation_wait_ms: 0,
            flush_interval_ms: 60_000,
            failed_chunks_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let transport = Arc::new(MemoryTransport::new());
        let mut recorder = Recorder::new(config, VrHeader::default(), transport.clone());
        recorder.start().unwrap();

        let away = (
            Vec3::new(3.0, 1.5, -2.0),
            Quat::from_rotation_y(1.2),
            Vec3::splat(2.0),
        );
        let identity = (Vec3::ZERO, Quat::IDENTITY, Vec3::ONE);
        // Away, snap to identity, hold, move only the position away again
        let poses = [
            away,
            identity,
            identity,
            (away.0, Quat::IDENTITY, Vec3::ONE),
        ];
        for (index, &(position, rotation, scale)) in poses.iter().enumerate() {
            let mut tick = recorder.begin_tick(index as i64 * 500_000, 0.0, 0.05);
            recorder
                .add_tracked_object(&mut tick, 9, 1, 0)
                .set_transform(position, rotation, scale);
            assert!(recorder.end_tick(tick));
        }
        recorder.stop().unwrap();

        let replay = ReplayDecoder::default().decode(&transport.stream());
        assert!(replay.is_complete(), "decode failed: {:?}", replay.error);
        assert_eq!(replay.ticks.len(), poses.len());
        for (index, (decoded, &(position, rotation, scale))) in
            replay.ticks.iter().zip(&poses).enumerate()
        {
            let obj = &decoded.objects[&9];
            assert_eq!(obj.position, position, "tick {index} position");
            assert_eq!(obj.rotation, rotation, "tick {index} rotation");
            assert_eq!(obj.scale, scale, "tick {index} scale");
        }
        // The snap is written with no transform payload but still flagged as new
        assert_eq!(replay.ticks[1].tick.num_objects, 1);
        assert_eq!(replay.ticks[2].tick.num_objects, 0);
    }

    #[test]
    fn test_truncated_stream_keeps_decoded_prefix() {
        let (_, stream) = record_session(3, 60, 4096);
        let full = ReplayDecoder::default().decode(&stream);
        assert!(full.is_complete());

        let mut rng = Pcg64::seed_from_u64(99);
        for _ in 0..25 {
            let cut = rng.random_range(1..stream.len());
            let partial = ReplayDecoder::default().decode(&stream[..cut]);

            assert!(partial.ticks.len() <= full.ticks.len());
            assert!(
                partial.is_complete()
                    || matches!(partial.error, Some(DecodeError::EndOfStream { .. })),
                "cut at {cut}: {:?}",
                partial.error
            );
            for (a, b) in partial.ticks.iter().zip(&full.ticks) {
                assert_eq!(a.tick.time_ticks, b.tick.time_ticks);
            }
        }
    }
}
