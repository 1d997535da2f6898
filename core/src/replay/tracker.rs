//! Per-object change detection
//!
//! The tracker keeps the last transmitted state of every tracked instance
//! and turns each new [`TrackedObjectSnapshot`] into an [`ObjectEntry`]
//! holding only what changed.
//!
//! Parameter diffs are one-directional: a key that disappears from the
//! snapshot is not reported as removed. Triggers accumulate in the shadow
//! state until the instance is forgotten, so a trigger id is sent once per
//! chunk even if the producer keeps reporting it.

use glam::{Quat, Vec3};
use hashbrown::{HashMap, HashSet};

use crate::config::LogLevel;
use crate::pool::{ObjectPool, Reusable};
use crate::replay::binary::{ObjectEntry, TextEntry};
use crate::replay::types::{TextState, TrackedObjectSnapshot};

/// Last transmitted state of one active instance
#[derive(Debug, Default)]
struct Shadow {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
    floats: HashMap<i32, f32>,
    ints: HashMap<i32, i32>,
    bools: HashMap<i32, bool>,
    triggers: HashSet<i32>,
    left_hand: HashMap<String, f32>,
    right_hand: HashMap<String, f32>,
}

impl Reusable for Shadow {
    fn reset(&mut self) {
        self.position = Vec3::ZERO;
        self.rotation = Quat::IDENTITY;
        self.scale = Vec3::ONE;
        self.floats.clear();
        self.ints.clear();
        self.bools.clear();
        self.triggers.clear();
        self.left_hand.clear();
        self.right_hand.clear();
    }
}

/// What the tracker found beyond the entry's own flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// The active flag differs from the last tick (or was never seen)
    pub new_active: bool,
    /// The object's text differs from the last tick
    pub text_changed: bool,
}

impl ChangeSummary {
    /// Whether `entry` carries anything worth writing this tick
    pub fn should_write(&self, entry: &ObjectEntry) -> bool {
        if self.new_active {
            return true;
        }
        entry.active
            && (entry.new_pos
                || entry.new_rot
                || entry.new_scale
                || entry.has_anim_params()
                || !entry.texts.is_empty()
                || !entry.left_hand.is_empty()
                || !entry.right_hand.is_empty())
    }
}

/// Diff engine holding per-instance shadow state
pub struct ChangeTracker {
    active: HashMap<u32, bool>,
    shadows: HashMap<u32, Shadow>,
    texts: HashMap<u32, TextState>,
    pool: ObjectPool<Shadow>,
}

/// Emit every `(key, value)` of `current` that differs from `shadow`, updating `shadow`
fn diff_map<K, V>(
    current: impl IntoIterator<Item = (K, V)>,
    shadow: &mut HashMap<K, V>,
    mut emit: impl FnMut(K, V),
) where
    K: std::hash::Hash + Eq + Clone,
    V: PartialEq + Copy,
{
    for (key, value) in current {
        if shadow.get(&key) != Some(&value) {
            shadow.insert(key.clone(), value);
            emit(key, value);
        }
    }
}

impl ChangeTracker {
    pub fn new(expected_objects: usize) -> Self {
        Self {
            active: HashMap::with_capacity(expected_objects),
            shadows: HashMap::with_capacity(expected_objects),
            texts: HashMap::new(),
            pool: ObjectPool::new("tracker shadows", expected_objects),
        }
    }

    /// Level gating the shadow pool's exhaustion warning
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.pool.set_log_level(level);
    }

    /// Number of instances with transform shadow state
    pub fn tracked_count(&self) -> usize {
        self.shadows.len()
    }

    /// Diff `obj` against the shadow state and fill `entry` with the changes
    ///
    /// `entry` is overwritten. Its transform always holds the current values;
    /// the `new_*` flags and parameter maps describe what must be sent.
    pub fn diff(&mut self, obj: &TrackedObjectSnapshot, entry: &mut ObjectEntry) -> ChangeSummary {
        *entry = ObjectEntry::new(obj.instance_id, obj.prefab_id, obj.parent_prefab_id);
        entry.active = obj.active;
        entry.position = obj.position;
        entry.rotation = obj.rotation;
        entry.scale = obj.scale;

        let mut summary = ChangeSummary {
            new_active: self.active.insert(obj.instance_id, obj.active) != Some(obj.active),
            text_changed: false,
        };

        if let Some(text) = &obj.text {
            if self.texts.get(&obj.instance_id) != Some(text) {
                self.texts.insert(obj.instance_id, text.clone());
                entry.texts.insert(
                    obj.instance_id,
                    TextEntry {
                        text: text.text.clone(),
                        size: text.size,
                    },
                );
                summary.text_changed = true;
            }
        }

        if !obj.active {
            return summary;
        }

        let shadow = match self.shadows.entry(obj.instance_id) {
            hashbrown::hash_map::Entry::Occupied(slot) => slot.into_mut(),
            hashbrown::hash_map::Entry::Vacant(slot) => {
                // First sighting: everything is new
                let mut shadow = self.pool.acquire();
                shadow.position = obj.position;
                shadow.rotation = obj.rotation;
                shadow.scale = obj.scale;
                let shadow = slot.insert(shadow);

                entry.new_pos = true;
                entry.new_rot = true;
                entry.new_scale = true;
                Self::diff_params(obj, shadow, entry);
                return summary;
            }
        };

        if shadow.position != obj.position {
            shadow.position = obj.position;
            entry.new_pos = true;
        }
        if shadow.rotation != obj.rotation {
            shadow.rotation = obj.rotation;
            entry.new_rot = true;
        }
        if shadow.scale != obj.scale {
            shadow.scale = obj.scale;
            entry.new_scale = true;
        }
        Self::diff_params(obj, shadow, entry);
        summary
    }

    fn diff_params(obj: &TrackedObjectSnapshot, shadow: &mut Shadow, entry: &mut ObjectEntry) {
        let anim = &obj.anim;
        diff_map(
            anim.floats.iter().map(|(&k, &v)| (k, v)),
            &mut shadow.floats,
            |k, v| {
                entry.floats.insert(k, v);
            },
        );
        diff_map(
            anim.ints.iter().map(|(&k, &v)| (k, v)),
            &mut shadow.ints,
            |k, v| {
                entry.ints.insert(k, v);
            },
        );
        diff_map(
            anim.bools.iter().map(|(&k, &v)| (k, v)),
            &mut shadow.bools,
            |k, v| {
                entry.bools.insert(k, v);
            },
        );
        for &id in &anim.triggers {
            if shadow.triggers.insert(id) {
                entry.triggers.insert(id);
            }
        }

        diff_hand(&obj.left_hand, &mut shadow.left_hand, &mut entry.left_hand);
        diff_hand(&obj.right_hand, &mut shadow.right_hand, &mut entry.right_hand);
    }

    /// Forget the last sent text of `instance_id` so it is sent again
    pub fn forget_text(&mut self, instance_id: u32) {
        self.texts.remove(&instance_id);
    }

    /// Drop all shadow state for a destroyed instance
    pub fn remove_last_data_for(&mut self, instance_id: u32) {
        self.active.remove(&instance_id);
        self.texts.remove(&instance_id);
        if let Some(shadow) = self.shadows.remove(&instance_id) {
            self.pool.release(shadow);
        }
    }

    /// Drop all shadow state
    pub fn clear_last_data(&mut self) {
        self.active.clear();
        self.texts.clear();
        for (_, shadow) in self.shadows.drain() {
            self.pool.release(shadow);
        }
    }
}

fn diff_hand(
    current: &std::collections::BTreeMap<String, f32>,
    shadow: &mut HashMap<String, f32>,
    out: &mut std::collections::BTreeMap<String, f32>,
) {
    for (bone, &offset) in current {
        if shadow.get(bone.as_str()) != Some(&offset) {
            shadow.insert(bone.clone(), offset);
            out.insert(bone.clone(), offset);
        }
    }
}
