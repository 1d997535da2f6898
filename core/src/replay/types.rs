//! In-memory snapshot types handed from the producer to the recorder
//!
//! These are not wire records. The producer fills one [`TickSnapshot`] per
//! engine tick with a [`TrackedObjectSnapshot`] per tracked object; the
//! recorder diffs them against its shadow state and encodes only the changes.
//! Both types are pooled and cleared with [`Reusable::reset`] between uses.

use std::collections::{BTreeMap, BTreeSet};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::pool::Reusable;

/// Animator parameter values keyed by parameter id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimatorParams {
    pub floats: BTreeMap<i32, f32>,
    pub ints: BTreeMap<i32, i32>,
    pub bools: BTreeMap<i32, bool>,
    /// Triggers fired since the snapshot was last reset
    pub triggers: BTreeSet<i32>,
}

impl AnimatorParams {
    pub fn is_empty(&self) -> bool {
        self.floats.is_empty()
            && self.ints.is_empty()
            && self.bools.is_empty()
            && self.triggers.is_empty()
    }

    fn clear(&mut self) {
        self.floats.clear();
        self.ints.clear();
        self.bools.clear();
        self.triggers.clear();
    }
}

/// Text displayed by a tracked object
#[derive(Debug, Clone, PartialEq)]
pub struct TextState {
    pub text: String,
    pub size: f32,
}

/// State of one tracked object during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObjectSnapshot {
    pub instance_id: u32,
    pub prefab_id: u16,
    pub parent_prefab_id: u16,
    pub active: bool,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub text: Option<TextState>,
    /// Scene the producer saw the object in; producer-side bookkeeping only
    ///
    /// Not encoded. Scene changes reach the stream through
    /// [`TickContext::scene_name`].
    pub scene_name: String,
    pub anim: AnimatorParams,
    /// Named bend offsets of the left hand bones
    pub left_hand: BTreeMap<String, f32>,
    /// Named bend offsets of the right hand bones
    pub right_hand: BTreeMap<String, f32>,
}

impl Default for TrackedObjectSnapshot {
    fn default() -> Self {
        Self {
            instance_id: 0,
            prefab_id: 0,
            parent_prefab_id: 0,
            active: true,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            text: None,
            scene_name: String::new(),
            anim: AnimatorParams::default(),
            left_hand: BTreeMap::new(),
            right_hand: BTreeMap::new(),
        }
    }
}

impl TrackedObjectSnapshot {
    /// Re-initialize a pooled snapshot for a new object
    pub fn init(&mut self, instance_id: u32, prefab_id: u16, parent_prefab_id: u16) {
        self.reset();
        self.instance_id = instance_id;
        self.prefab_id = prefab_id;
        self.parent_prefab_id = parent_prefab_id;
    }

    pub fn set_transform(&mut self, position: Vec3, rotation: Quat, scale: Vec3) {
        self.position = position;
        self.rotation = rotation;
        self.scale = scale;
    }

    pub fn set_text(&mut self, text: impl Into<String>, size: f32) {
        self.text = Some(TextState {
            text: text.into(),
            size,
        });
    }
}

impl Reusable for TrackedObjectSnapshot {
    fn reset(&mut self) {
        self.instance_id = 0;
        self.prefab_id = 0;
        self.parent_prefab_id = 0;
        self.active = true;
        self.position = Vec3::ZERO;
        self.rotation = Quat::IDENTITY;
        self.scale = Vec3::ONE;
        self.text = None;
        self.scene_name.clear();
        self.anim.clear();
        self.left_hand.clear();
        self.right_hand.clear();
    }
}

/// Session-level state stamped into each tick when it is submitted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickContext {
    pub scene_name: String,
    pub is_immersion: bool,
    pub event_name: Option<String>,
    pub skybox_name: Option<String>,
    pub fps: Option<i32>,
}

impl TickContext {
    fn clear(&mut self) {
        self.scene_name.clear();
        self.is_immersion = false;
        self.event_name = None;
        self.skybox_name = None;
        self.fps = None;
    }
}

/// One tick's worth of object snapshots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSnapshot {
    /// Wall-clock time in 100ns ticks
    pub time_ticks: i64,
    pub unscaled_time: f32,
    pub delta_time: f32,
    /// Time the producer spent collecting this tick, in seconds
    pub handle_tick_time: f32,
    pub objects: Vec<TrackedObjectSnapshot>,
    /// Instance ids that stopped being tracked during this tick
    pub destroyed: Vec<u32>,
    pub context: TickContext,
}

impl TickSnapshot {
    pub fn init(&mut self, time_ticks: i64, unscaled_time: f32, delta_time: f32) {
        self.time_ticks = time_ticks;
        self.unscaled_time = unscaled_time;
        self.delta_time = delta_time;
        self.handle_tick_time = 0.0;
    }
}

/// Object snapshots still attached are dropped, not pooled. Drain them into
/// their own pool before releasing the tick.
impl Reusable for TickSnapshot {
    fn reset(&mut self) {
        self.time_ticks = 0;
        self.unscaled_time = 0.0;
        self.delta_time = 0.0;
        self.handle_tick_time = 0.0;
        self.objects.clear();
        self.destroyed.clear();
        self.context.clear();
    }
}

/// Location reported for the session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub city: String,
    pub country: String,
    pub region: String,
    pub latitude: f32,
    pub longitude: f32,
}
