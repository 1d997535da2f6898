//! Recorder health counters

use std::time::{Duration, Instant};

use tracing::info;

/// Counters published by the worker after every cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Ticks accepted by `end_tick`
    pub ticks_submitted: u64,
    /// Ticks encoded into a chunk
    pub ticks_encoded: u64,
    /// Ticks evicted from the queue or dropped on encode errors
    pub ticks_dropped: u64,
    /// Object entries written
    pub objects_written: u64,
    /// Chunks handed to the uploader, including the header-only ones
    pub chunks_flushed: u64,
    pub events_recorded: u64,
    pub event_batches_flushed: u64,
}

impl RecorderStats {
    /// Add the worker's per-cycle counters
    pub(super) fn absorb(&mut self, cycle: &RecorderStats) {
        self.ticks_encoded += cycle.ticks_encoded;
        self.ticks_dropped += cycle.ticks_dropped;
        self.objects_written += cycle.objects_written;
        self.chunks_flushed += cycle.chunks_flushed;
        self.event_batches_flushed += cycle.event_batches_flushed;
    }
}

/// Worker-side timing, logged at the profiling level
#[derive(Debug)]
pub(super) struct CycleTimer {
    cycles: u64,
    busy: Duration,
    slowest: Duration,
    last_log_time: Instant,
}

impl CycleTimer {
    pub fn new() -> Self {
        Self {
            cycles: 0,
            busy: Duration::ZERO,
            slowest: Duration::ZERO,
            last_log_time: Instant::now(),
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.cycles += 1;
        self.busy += elapsed;
        self.slowest = self.slowest.max(elapsed);
    }

    /// Log and reset once a second
    pub fn maybe_log(&mut self, stats: &RecorderStats) {
        if self.last_log_time.elapsed().as_secs() < 1 {
            return;
        }
        let avg_us = if self.cycles > 0 {
            self.busy.as_micros() as f64 / self.cycles as f64
        } else {
            0.0
        };
        info!(
            "RECORDER METRICS: cycles={}, avg={:.1}us, slowest={}us, ticks={}, dropped={}, chunks={}",
            self.cycles,
            avg_us,
            self.slowest.as_micros(),
            stats.ticks_encoded,
            stats.ticks_dropped,
            stats.chunks_flushed,
        );
        self.cycles = 0;
        self.busy = Duration::ZERO;
        self.slowest = Duration::ZERO;
        self.last_log_time = Instant::now();
    }
}
