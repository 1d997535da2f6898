//! State shared between the producer and the recorder worker
//!
//! Everything here is guarded by one mutex. The producer holds it only to
//! push or pull pooled instances; the worker holds it to swap the queues
//! out and to hand instances back.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::warn;

use crate::config::RecorderConfig;
use crate::pool::ObjectPool;
use crate::replay::types::{Geolocation, TickContext, TickSnapshot, TrackedObjectSnapshot};

use super::events::RecordedEvent;
use super::metrics::RecorderStats;

/// Session state that is stamped into every submitted tick
#[derive(Debug, Clone, Default)]
pub(super) struct SessionContext {
    pub scene_name: String,
    pub is_immersion: bool,
    // One-shot values, consumed by the next submitted tick
    pub pending_event: Option<String>,
    pub pending_skybox: Option<String>,
    pub pending_fps: Option<i32>,
}

impl SessionContext {
    /// Copy the context into a tick, consuming the one-shot values
    pub fn stamp(&mut self, context: &mut TickContext) {
        context.scene_name.clone_from(&self.scene_name);
        context.is_immersion = self.is_immersion;
        context.event_name = self.pending_event.take();
        context.skybox_name = self.pending_skybox.take();
        context.fps = self.pending_fps.take();
    }
}

pub(super) struct Queue {
    pub ticks: Vec<TickSnapshot>,
    pub events: Vec<RecordedEvent>,
    pub tick_pool: ObjectPool<TickSnapshot>,
    pub object_pool: ObjectPool<TrackedObjectSnapshot>,
    pub context: SessionContext,
    pub geolocation: Option<Geolocation>,
    pub stats: RecorderStats,
    pub stop: bool,
}

impl Queue {
    pub fn new(config: &RecorderConfig) -> Self {
        let ticks_in_flight = config.expected_max_ticks_in_flight.max(1);
        // Ticks sit in the producer, the queue and the worker at once
        let mut tick_pool = ObjectPool::new("ticks", ticks_in_flight * 3);
        tick_pool.set_log_level(config.log_level);
        tick_pool.prefill(ticks_in_flight);
        let mut object_pool = ObjectPool::new("objects", config.object_pool_capacity());
        object_pool.set_log_level(config.log_level);
        object_pool.prefill(config.expected_max_tracked_objects);

        Self {
            ticks: Vec::with_capacity(ticks_in_flight),
            events: Vec::with_capacity(config.expected_max_events_in_packet),
            tick_pool,
            object_pool,
            context: SessionContext::default(),
            geolocation: None,
            stats: RecorderStats::default(),
            stop: false,
        }
    }

    /// Hand a tick and all of its objects back to the pools
    pub fn release_tick(&mut self, mut tick: TickSnapshot) {
        for obj in tick.objects.drain(..) {
            self.object_pool.release(obj);
        }
        self.tick_pool.release(tick);
    }
}

/// Queue plus the condvar the worker sleeps on
pub(super) struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

impl Shared {
    pub fn new(config: &RecorderConfig) -> Self {
        Self {
            queue: Mutex::new(Queue::new(config)),
            wake: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| {
            warn!("Recorder queue mutex poisoned; continuing");
            e.into_inner()
        })
    }

    /// Wake the worker
    pub fn notify(&self) {
        self.wake.notify_all();
    }

    /// Sleep until notified or `timeout` elapses
    pub fn wait<'a>(&self, guard: MutexGuard<'a, Queue>, timeout: Duration) -> MutexGuard<'a, Queue> {
        let (guard, _) = self.wake.wait_timeout(guard, timeout).unwrap_or_else(|e| {
            warn!("Recorder condvar wait mutex poisoned; continuing");
            e.into_inner()
        });
        guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_consumes_one_shot_values() {
        let mut context = SessionContext {
            scene_name: "Lobby".into(),
            is_immersion: true,
            pending_event: Some("door".into()),
            pending_skybox: Some("Night".into()),
            pending_fps: Some(72),
        };

        let mut first = TickContext::default();
        context.stamp(&mut first);
        assert_eq!(first.scene_name, "Lobby");
        assert_eq!(first.event_name.as_deref(), Some("door"));
        assert_eq!(first.skybox_name.as_deref(), Some("Night"));
        assert_eq!(first.fps, Some(72));

        let mut second = TickContext::default();
        context.stamp(&mut second);
        assert_eq!(second.event_name, None);
        assert_eq!(second.skybox_name, None);
        assert_eq!(second.fps, None);
        assert_eq!(second.scene_name, "Lobby");
        assert!(second.is_immersion);
    }

    #[test]
    fn test_release_tick_returns_objects() {
        let mut queue = Queue::new(&RecorderConfig::default());
        let mut tick = queue.tick_pool.acquire();
        tick.objects.push(queue.object_pool.acquire());
        tick.objects.push(queue.object_pool.acquire());
        assert_eq!(queue.object_pool.outstanding_count(), 2);

        queue.release_tick(tick);
        assert_eq!(queue.object_pool.outstanding_count(), 0);
        assert_eq!(queue.tick_pool.outstanding_count(), 0);
    }
}
