//! Producer-facing recorder handle
//!
//! The producer runs once per engine tick:
//!
//! ```ignore
//! let mut tick = recorder.begin_tick(now_ticks, unscaled, delta);
//! for object in tracked {
//!     let snapshot = recorder.add_tracked_object(&mut tick, object.id, object.prefab, object.parent);
//!     snapshot.set_transform(object.position, object.rotation, object.scale);
//! }
//! recorder.end_tick(tick);
//! ```
//!
//! Snapshots come from pools shared with the worker thread, which encodes
//! them and hands them back.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::buffer::BufferError;
use crate::config::{LogLevel, RecorderConfig};
use crate::replay::binary::VrHeader;
use crate::replay::types::{Geolocation, TickSnapshot, TrackedObjectSnapshot};
use crate::transport::ChunkTransport;

use super::dispatch::UploadDispatcher;
use super::events::RecordedEvent;
use super::metrics::RecorderStats;
use super::queue::Shared;
use super::worker::RecorderWorker;

/// Errors starting or stopping a recorder
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("recorder already started")]
    AlreadyStarted,

    #[error("recorder is not recording")]
    NotRecording,

    #[error("invalid chunk header: {0}")]
    Header(#[from] BufferError),

    #[error("failed to build upload runtime: {0}")]
    Runtime(std::io::Error),

    #[error("failed to spawn recorder thread: {0}")]
    Spawn(std::io::Error),
}

/// Lifecycle of a [`Recorder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    /// Stopped recorders cannot be restarted
    Stopped,
}

/// New session id from the current UTC time
fn new_session_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}

/// Session recorder
pub struct Recorder {
    config: RecorderConfig,
    session_id: String,
    vr_header: VrHeader,
    transport: Arc<dyn ChunkTransport>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    state: RecorderState,
}

impl Recorder {
    pub fn new(config: RecorderConfig, vr_header: VrHeader, transport: Arc<dyn ChunkTransport>) -> Self {
        let shared = Arc::new(Shared::new(&config));
        Self {
            config,
            session_id: new_session_id(),
            vr_header,
            transport,
            shared,
            worker: None,
            state: RecorderState::Idle,
        }
    }

    /// Replace the generated session id
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn stats(&self) -> RecorderStats {
        self.shared.lock().stats
    }

    /// Spawn the worker thread and start accepting ticks
    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Idle {
            return Err(RecorderError::AlreadyStarted);
        }

        let dispatcher =
            UploadDispatcher::new(&self.config, Arc::clone(&self.transport)).map_err(RecorderError::Runtime)?;
        let worker = RecorderWorker::new(
            self.config.clone(),
            self.session_id.clone(),
            self.vr_header.clone(),
            Arc::clone(&self.shared),
            dispatcher,
        )?;

        let handle = thread::Builder::new()
            .name("insight-recorder".into())
            .spawn(move || worker.run())
            .map_err(RecorderError::Spawn)?;

        self.worker = Some(handle);
        self.state = RecorderState::Recording;
        debug!(session = %self.session_id, "Recording started");
        Ok(())
    }

    /// Stop recording and wait for the worker to drain
    ///
    /// Pending ticks are flushed and a terminating chunk is sent. If the
    /// worker does not finish within the shutdown timeout it is abandoned.
    pub fn stop(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Recording {
            return Err(RecorderError::NotRecording);
        }
        self.state = RecorderState::Stopped;

        self.shared.lock().stop = true;
        self.shared.notify();

        if let Some(handle) = self.worker.take() {
            let deadline = Instant::now() + self.config.shutdown_timeout();
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                if handle.join().is_err() && self.config.log_level.allows(LogLevel::Error) {
                    tracing::error!("Recorder worker panicked");
                }
            } else if self.config.log_level.allows(LogLevel::Warning) {
                warn!(
                    timeout_ms = self.config.shutdown_timeout_ms,
                    "Recorder worker did not stop in time, abandoning it"
                );
            }
        }
        debug!(session = %self.session_id, "Recording stopped");
        Ok(())
    }

    /// Take an empty tick from the pool
    pub fn begin_tick(&self, time_ticks: i64, unscaled_time: f32, delta_time: f32) -> TickSnapshot {
        let mut tick = self.shared.lock().tick_pool.acquire();
        tick.init(time_ticks, unscaled_time, delta_time);
        tick
    }

    /// Add a pooled object snapshot to `tick` and return it for filling in
    pub fn add_tracked_object<'a>(
        &self,
        tick: &'a mut TickSnapshot,
        instance_id: u32,
        prefab_id: u16,
        parent_prefab_id: u16,
    ) -> &'a mut TrackedObjectSnapshot {
        let mut obj = self.shared.lock().object_pool.acquire();
        obj.init(instance_id, prefab_id, parent_prefab_id);
        tick.objects.push(obj);
        let last = tick.objects.len() - 1;
        &mut tick.objects[last]
    }

    /// Mark `instance_id` as no longer tracked from this tick on
    pub fn destroy_object(&self, tick: &mut TickSnapshot, instance_id: u32) {
        tick.destroyed.push(instance_id);
    }

    /// Stamp the session context into `tick` and queue it for encoding
    ///
    /// Returns `false` and recycles the tick when not recording.
    pub fn end_tick(&self, mut tick: TickSnapshot) -> bool {
        let mut queue = self.shared.lock();
        if self.state != RecorderState::Recording {
            queue.release_tick(tick);
            return false;
        }
        queue.context.stamp(&mut tick.context);
        queue.ticks.push(tick);
        queue.stats.ticks_submitted += 1;
        drop(queue);
        self.shared.notify();
        true
    }

    /// Record a named event
    ///
    /// The event is sent in the next JSON batch and its name is attached to
    /// the next submitted tick.
    pub fn record_event(&self, name: impl Into<String>, timestamp: DateTime<Utc>) {
        if self.state != RecorderState::Recording {
            return;
        }
        let name = name.into();
        let mut queue = self.shared.lock();
        queue.context.pending_event = Some(name.clone());
        queue.events.push(RecordedEvent { name, timestamp });
        queue.stats.events_recorded += 1;
        drop(queue);
        self.shared.notify();
    }

    pub fn set_scene(&self, scene_name: impl Into<String>) {
        self.shared.lock().context.scene_name = scene_name.into();
    }

    pub fn set_immersion(&self, is_immersion: bool) {
        self.shared.lock().context.is_immersion = is_immersion;
    }

    /// Announce a skybox change on the next submitted tick
    pub fn set_skybox(&self, skybox_name: impl Into<String>) {
        self.shared.lock().context.pending_skybox = Some(skybox_name.into());
    }

    /// Report the frame rate on the next submitted tick
    pub fn set_fps(&self, fps: i32) {
        self.shared.lock().context.pending_fps = Some(fps);
    }

    /// Provide the location written into the session header
    pub fn set_geolocation(&self, geolocation: Geolocation) {
        self.shared.lock().geolocation = Some(geolocation);
        self.shared.notify();
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.state == RecorderState::Recording {
            let _ = self.stop();
        }
    }
}
