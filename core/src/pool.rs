//! Reusable instance pools
//!
//! Pools keep released instances around so the recording hot path does not
//! allocate per tick. They are sized for the expected worst case; running
//! past that size allocates a fresh instance with a warning instead of
//! failing.
//!
//! A pool does not check where a released instance came from. Releasing the
//! same instance twice, or one that was never acquired, is not detected.

use tracing::warn;

use crate::config::LogLevel;

/// Types that can be cleared for reuse
pub trait Reusable {
    /// Clear the instance back to an empty state, keeping allocations
    fn reset(&mut self);
}

impl Reusable for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Free-list of reusable instances
pub struct ObjectPool<T> {
    name: &'static str,
    free: Vec<T>,
    capacity: usize,
    outstanding: usize,
    factory: fn() -> T,
    log_level: LogLevel,
}

impl<T: Reusable + Default> ObjectPool<T> {
    /// Create an empty pool that allocates with `T::default()`
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self::with_factory(name, capacity, T::default)
    }
}

impl<T: Reusable> ObjectPool<T> {
    /// Create an empty pool with a custom constructor
    pub fn with_factory(name: &'static str, capacity: usize, factory: fn() -> T) -> Self {
        Self {
            name,
            free: Vec::new(),
            capacity,
            outstanding: 0,
            factory,
            log_level: LogLevel::default(),
        }
    }

    /// Level gating the exhaustion warning
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.log_level = level;
    }

    /// Pre-allocate `count` instances (bounded by the pool capacity)
    pub fn prefill(&mut self, count: usize) {
        let target = count.min(self.capacity);
        while self.free.len() < target {
            self.free.push((self.factory)());
        }
    }

    /// Take an instance out of the pool
    ///
    /// Returns a reused instance when one is available, otherwise constructs
    /// a new one.
    pub fn acquire(&mut self) -> T {
        if self.outstanding == self.capacity && self.warns_on_exhaustion() {
            warn!(
                pool = self.name,
                capacity = self.capacity,
                "Pool exhausted, allocating past expected capacity"
            );
        }
        self.outstanding += 1;
        self.free.pop().unwrap_or_else(self.factory)
    }

    /// Hand an instance back for reuse
    pub fn release(&mut self, mut item: T) {
        item.reset();
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.free.len() < self.capacity {
            self.free.push(item);
        }
    }

    fn warns_on_exhaustion(&self) -> bool {
        self.log_level.allows(LogLevel::Warning)
    }

    /// Number of instances acquired but not yet released
    pub fn outstanding_count(&self) -> usize {
        self.outstanding
    }

    /// Number of idle instances ready for reuse
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
