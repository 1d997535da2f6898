//! Insight session recording
//!
//! Tracked object state is recorded as a stream of delta-encoded binary
//! chunks and decoded back into a full per-tick history:
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Recording                             │
//! │ producer ─▶ Recorder ─▶ worker ─▶ ChangeTracker ─▶ chunks  │
//! │                                   (binary codec)           │
//! └────────────────────────────────────────────────────────────┘
//!
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Replay                                │
//! │ chunks ─▶ ReplayDecoder ─▶ DecodedTick × N                 │
//! │           (fills unchanged fields from the previous tick)  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ## Recording a session
//!
//! ```ignore
//! use insight_core::replay::Recorder;
//!
//! let mut recorder = Recorder::new(config, vr_header, transport);
//! recorder.start()?;
//! recorder.set_scene("Lobby");
//!
//! // Once per engine tick:
//! let mut tick = recorder.begin_tick(now_ticks, unscaled_time, delta_time);
//! let cube = recorder.add_tracked_object(&mut tick, 42, 3, 0);
//! cube.set_transform(position, rotation, scale);
//! recorder.end_tick(tick);
//!
//! recorder.stop()?;
//! ```
//!
//! ## Decoding a stream
//!
//! ```ignore
//! use insight_core::replay::ReplayDecoder;
//!
//! let replay = ReplayDecoder::default().decode(&bytes);
//! for tick in &replay.ticks {
//!     println!("{} objects at {}", tick.objects.len(), tick.tick.time_ticks);
//! }
//! if let Some(err) = &replay.error {
//!     eprintln!("stream truncated: {err}");
//! }
//! ```

pub mod binary;
pub mod decoder;
pub mod runtime;
pub mod tracker;
pub mod types;

// Re-export snapshot types
pub use types::{
    AnimatorParams, Geolocation, TextState, TickContext, TickSnapshot, TrackedObjectSnapshot,
};

// Re-export binary format
pub use binary::{
    ChunkHeader, DecodeError, DestroyObjectEntry, ObjectEntry, ProtocolError, TickEntry, VrHeader,
    WireReader, WireRecord,
};

// Re-export decoding and recording
pub use decoder::{DecodedReplay, DecodedTick, ReplayDecoder};
pub use runtime::{Recorder, RecorderError, RecorderState, RecorderStats};
pub use tracker::{ChangeSummary, ChangeTracker};
