//! Recorder worker thread
//!
//! Owns the chunk buffer, the event buffer, and the change tracker. Each
//! cycle it swaps the producer's queues out under the mutex, encodes the
//! ticks and events without holding it, then hands the pooled instances
//! back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferError, ByteBuffer};
use crate::config::{LogLevel, RecorderConfig};
use crate::replay::binary::{
    ChunkHeader, DestroyObjectEntry, MAX_LIST_LEN, ObjectEntry, TickEntry, VrHeader, WireRecord,
};
use crate::replay::tracker::ChangeTracker;
use crate::replay::types::TickSnapshot;
use crate::transport::ChunkUpload;

use super::dispatch::UploadDispatcher;
use super::events::{EventBuffer, RecordedEvent};
use super::metrics::{CycleTimer, RecorderStats};
use super::queue::Shared;

pub(super) struct RecorderWorker {
    config: RecorderConfig,
    session_id: String,
    vr_header: VrHeader,
    shared: Arc<Shared>,
    dispatcher: UploadDispatcher,

    /// Ticks and events swapped out of the shared queue
    ticks: Vec<TickSnapshot>,
    pending_events: Vec<RecordedEvent>,

    chunk: ByteBuffer,
    header: ChunkHeader,
    events: EventBuffer,
    tracker: ChangeTracker,
    /// Reused for every object entry
    scratch: ObjectEntry,
    /// Destroyed ids of dropped ticks, written with the next encoded tick
    pending_destroys: Vec<u32>,

    chunk_id: u32,
    ticks_in_chunk: i32,
    chunk_started: Option<Instant>,
    first_tick_time: Option<i64>,
    last_tick_time: i64,
    last_scene: Option<String>,
    initial_chunk_sent: bool,

    /// Counters not yet published to the shared stats
    cycle_stats: RecorderStats,
    timer: CycleTimer,
}

impl RecorderWorker {
    /// Build the worker and write the first chunk header
    ///
    /// Fails if the header does not fit the configured buffer or the app
    /// version string is too long.
    pub fn new(
        config: RecorderConfig,
        session_id: String,
        vr_header: VrHeader,
        shared: Arc<Shared>,
        dispatcher: UploadDispatcher,
    ) -> Result<Self, BufferError> {
        let mut chunk = ByteBuffer::with_capacity(config.replay_buffer_capacity);
        let header = ChunkHeader::new(config.app_version.clone(), config.tick_rate_hz);
        header.encode(&mut chunk)?;
        let mut tracker = ChangeTracker::new(config.expected_max_tracked_objects);
        tracker.set_log_level(config.log_level);

        Ok(Self {
            session_id,
            vr_header,
            shared,
            dispatcher,
            ticks: Vec::with_capacity(config.expected_max_ticks_in_flight),
            pending_events: Vec::with_capacity(config.expected_max_events_in_packet),
            chunk,
            header,
            events: EventBuffer::new(config.event_buffer_capacity),
            tracker,
            scratch: ObjectEntry::new(0, 0, 0),
            pending_destroys: Vec::new(),
            chunk_id: 0,
            ticks_in_chunk: 0,
            chunk_started: None,
            first_tick_time: None,
            last_tick_time: 0,
            last_scene: None,
            initial_chunk_sent: false,
            cycle_stats: RecorderStats::default(),
            timer: CycleTimer::new(),
            config,
        })
    }

    fn logs(&self, level: LogLevel) -> bool {
        self.config.log_level.allows(level)
    }

    /// Main loop, returns once the stop flag has been seen and the final
    /// chunk has been handed off
    pub fn run(mut self) {
        debug!(session = %self.session_id, "Recorder worker started");
        self.dispatcher.start_retry_sweep(self.config.retry_interval());

        loop {
            let stop = self.swap_queues();
            let started = Instant::now();
            self.process_cycle();
            self.timer.record(started.elapsed());
            if self.logs(LogLevel::Profiling) {
                let stats = self.shared.lock().stats;
                self.timer.maybe_log(&stats);
            }
            if stop {
                break;
            }
        }

        self.finish();
        debug!(session = %self.session_id, "Recorder worker finished");
    }

    /// Take everything queued by the producer
    ///
    /// Sleeps up to the poll interval when the queues are empty. Ticks past
    /// the expected pipeline depth are dropped oldest first. Returns the stop
    /// flag.
    fn swap_queues(&mut self) -> bool {
        let mut queue = self.shared.lock();
        if queue.ticks.is_empty() && queue.events.is_empty() && !queue.stop {
            queue = self.shared.wait(queue, self.config.poll_interval());
        }
        std::mem::swap(&mut queue.ticks, &mut self.ticks);
        std::mem::swap(&mut queue.events, &mut self.pending_events);

        let max_in_flight = self.config.expected_max_ticks_in_flight.max(1);
        let excess = self.ticks.len().saturating_sub(max_in_flight);
        if excess > 0 {
            if self.config.log_level.allows(LogLevel::Warning) {
                warn!(
                    dropped = excess,
                    max = max_in_flight,
                    "Recorder falling behind, dropping oldest ticks"
                );
            }
            for tick in self.ticks.drain(..excess) {
                self.pending_destroys.extend_from_slice(&tick.destroyed);
                queue.release_tick(tick);
            }
            queue.stats.ticks_dropped += excess as u64;
        }
        queue.stop
    }

    fn process_cycle(&mut self) {
        if !self.initial_chunk_sent && !self.ticks.is_empty() {
            self.send_initial_chunk();
        }

        let mut ticks = std::mem::take(&mut self.ticks);
        for tick in &ticks {
            self.handle_tick(tick);
        }

        let mut events = std::mem::take(&mut self.pending_events);
        for event in &events {
            self.handle_event(event);
        }

        let chunk_due = self
            .chunk_started
            .is_some_and(|started| started.elapsed() >= self.config.flush_interval());
        if chunk_due {
            self.flush_chunk(false);
        }
        if self.events.len() >= self.config.expected_max_events_in_packet.max(1)
            || self.events.should_flush(self.config.flush_interval())
        {
            self.flush_events();
        }

        {
            let mut queue = self.shared.lock();
            for tick in ticks.drain(..) {
                queue.release_tick(tick);
            }
            queue.stats.absorb(&self.cycle_stats);
        }
        self.cycle_stats = RecorderStats::default();
        events.clear();

        self.ticks = ticks;
        self.pending_events = events;
    }

    /// Write the session header chunk
    ///
    /// Waits up to the configured time for a geolocation so it can be
    /// included; the chunk is sent without one otherwise.
    fn send_initial_chunk(&mut self) {
        let deadline = Instant::now() + self.config.geolocation_wait();
        let geolocation = {
            let mut queue = self.shared.lock();
            loop {
                if queue.geolocation.is_some() || queue.stop || Instant::now() >= deadline {
                    break queue.geolocation.clone();
                }
                queue = self.shared.wait(queue, remaining(deadline));
            }
        };
        match &geolocation {
            Some(location) => self.vr_header.set_geolocation(location),
            None => {
                if self.logs(LogLevel::Info) {
                    info!("No geolocation available for the session header");
                }
            }
        }

        let start = self.chunk.offset();
        if let Err(e) = self.vr_header.encode(&mut self.chunk) {
            self.chunk.truncate(start);
            if self.logs(LogLevel::Warning) {
                warn!("Session header rejected ({}), writing an empty one", e);
            }
            if VrHeader::default().encode(&mut self.chunk).is_err() {
                self.chunk.truncate(start);
            }
        }
        self.flush_chunk(false);
        self.initial_chunk_sent = true;
    }

    fn handle_tick(&mut self, tick: &TickSnapshot) {
        let result = match self.try_encode_tick(tick) {
            Err(BufferError::BufferFull { .. }) if self.ticks_in_chunk > 0 => {
                self.flush_chunk(false);
                self.try_encode_tick(tick)
            }
            result => result,
        };

        match result {
            Ok(()) => self.cycle_stats.ticks_encoded += 1,
            Err(e) => {
                if self.logs(LogLevel::Warning) {
                    warn!(time = tick.time_ticks, "Dropping tick: {}", e);
                }
                // The failed attempt may have advanced the shadow state
                self.tracker.clear_last_data();
                self.pending_destroys.extend_from_slice(&tick.destroyed);
                self.cycle_stats.ticks_dropped += 1;
            }
        }
    }

    /// Encode one tick, rolling the buffer back on failure
    fn try_encode_tick(&mut self, tick: &TickSnapshot) -> Result<(), BufferError> {
        let start = self.chunk.offset();
        match self.encode_tick(tick) {
            Ok(objects) => {
                self.ticks_in_chunk += 1;
                self.cycle_stats.objects_written += objects;
                self.first_tick_time.get_or_insert(tick.time_ticks);
                self.last_tick_time = tick.time_ticks;
                self.chunk_started.get_or_insert_with(Instant::now);
                self.pending_destroys.clear();
                Ok(())
            }
            Err(e) => {
                self.chunk.truncate(start);
                Err(e)
            }
        }
    }

    fn encode_tick(&mut self, tick: &TickSnapshot) -> Result<u64, BufferError> {
        let context = &tick.context;
        let new_scene = self.last_scene.as_deref() != Some(context.scene_name.as_str());
        let mut entry = TickEntry {
            time_ticks: tick.time_ticks,
            unscaled_time: tick.unscaled_time,
            delta_time: tick.delta_time,
            handle_tick_time: tick.handle_tick_time,
            num_objects: 0,
            num_deleted: 0,
            is_immersion: context.is_immersion,
            scene_name: new_scene.then(|| context.scene_name.clone()),
            event_name: context.event_name.clone(),
            skybox_name: context.skybox_name.clone(),
            fps: context.fps,
        };

        let entry_start = self.chunk.offset();
        entry.encode(&mut self.chunk)?;

        for obj in &tick.objects {
            let summary = self.tracker.diff(obj, &mut self.scratch);
            if !obj.active && summary.text_changed {
                // Inactive entries carry no text; resend it once active again
                self.tracker.forget_text(obj.instance_id);
            }
            if !summary.should_write(&self.scratch) {
                continue;
            }
            if let Some((what, len)) = self.scratch.oversized_list() {
                if self.logs(LogLevel::Warning) {
                    warn!(
                        instance = obj.instance_id,
                        count = len,
                        "Only the first {} {} are recorded",
                        MAX_LIST_LEN,
                        what
                    );
                }
            }
            if entry.num_objects == u16::MAX {
                if self.logs(LogLevel::Warning) {
                    warn!(time = tick.time_ticks, "Object count limit reached, skipping the rest");
                }
                break;
            }
            self.scratch.encode(&mut self.chunk)?;
            entry.num_objects += 1;
        }

        let carried = self
            .pending_destroys
            .iter()
            .filter(|&&id| !tick.destroyed.contains(&id));
        for &instance_id in carried.chain(&tick.destroyed).take(u16::MAX as usize) {
            DestroyObjectEntry { instance_id }.encode(&mut self.chunk)?;
            self.tracker.remove_last_data_for(instance_id);
            entry.num_deleted += 1;
        }

        self.chunk.patch_at(entry_start, |buf| entry.encode(buf))?;
        if new_scene {
            self.last_scene = Some(context.scene_name.clone());
        }
        Ok(u64::from(entry.num_objects))
    }

    fn handle_event(&mut self, event: &RecordedEvent) {
        let mut result = self.events.push(&self.config.user_id, &self.session_id, event);
        if matches!(result, Err(BufferError::BufferFull { .. })) && !self.events.is_empty() {
            self.flush_events();
            result = self.events.push(&self.config.user_id, &self.session_id, event);
        }
        if let Err(e) = result {
            if self.logs(LogLevel::Warning) {
                warn!(event = %event.name, "Dropping event: {}", e);
            }
        }
    }

    /// Seal the current chunk, hand it to the dispatcher, and start a new one
    fn flush_chunk(&mut self, is_last: bool) {
        self.header.num_ticks = self.ticks_in_chunk;
        let header = &self.header;
        if let Err(e) = self.chunk.patch_at(0, |buf| header.encode(buf)) {
            if self.logs(LogLevel::Error) {
                error!(chunk = self.chunk_id, "Failed to patch chunk header: {}", e);
            }
        }

        let upload = ChunkUpload {
            session_id: self.session_id.clone(),
            chunk_id: self.chunk_id,
            bytes: self.dispatcher.take_bytes(self.chunk.as_slice()),
            is_last,
            first_tick_time: self.first_tick_time.unwrap_or(0),
            last_tick_time: self.last_tick_time,
        };
        debug!(
            chunk = upload.chunk_id,
            ticks = self.ticks_in_chunk,
            bytes = upload.bytes.len(),
            is_last,
            "Flushing chunk"
        );
        self.dispatcher.dispatch_chunk(upload);
        self.cycle_stats.chunks_flushed += 1;

        self.chunk_id += 1;
        self.ticks_in_chunk = 0;
        self.chunk_started = None;
        self.first_tick_time = None;
        self.last_tick_time = 0;
        self.header.num_ticks = 0;
        self.chunk.reset();
        if let Err(e) = self.header.encode(&mut self.chunk) {
            // Validated when the worker was built
            if self.logs(LogLevel::Error) {
                error!("Failed to write chunk header: {}", e);
            }
        }

        // The next chunk must decode on its own
        self.tracker.clear_last_data();
        self.last_scene = None;
    }

    fn flush_events(&mut self) {
        if self.events.is_empty() {
            return;
        }
        let count = self.events.len();
        let mut batch = self.dispatcher.take_bytes(&[]);
        self.events.finish(Utc::now(), &mut batch);
        debug!(events = count, bytes = batch.len(), "Flushing event batch");
        self.dispatcher.dispatch_events(self.session_id.clone(), batch);
        self.cycle_stats.event_batches_flushed += 1;
    }

    /// Final drain after the stop flag was seen
    fn finish(&mut self) {
        if self.ticks_in_chunk > 0 {
            self.flush_chunk(false);
        }
        if self.initial_chunk_sent {
            self.flush_chunk(true);
        }
        self.flush_events();
        self.shared.lock().stats.absorb(&self.cycle_stats);
        self.cycle_stats = RecorderStats::default();

        // Half of the budget, the rest is for the caller's join
        let drain_timeout = self.config.shutdown_timeout() / 2;
        if !self.dispatcher.wait_idle(drain_timeout) && self.logs(LogLevel::Warning) {
            warn!(
                outstanding = self.dispatcher.outstanding(),
                "Uploads still running at shutdown"
            );
        }
    }
}

/// Time left before `deadline`, zero once it has passed
fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
