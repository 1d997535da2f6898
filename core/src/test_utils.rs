//! Shared test utilities for integration and unit tests

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};

use crate::replay::types::{TickSnapshot, TrackedObjectSnapshot};
use crate::transport::{ChunkTransport, ChunkUpload, TransportError, TransportFuture};

// ============================================================================
// Memory Transport
// ============================================================================

/// Transport that keeps every upload in memory
///
/// Can be switched to reject everything to exercise the failure paths.
#[derive(Default)]
pub struct MemoryTransport {
    chunks: Mutex<Vec<ChunkUpload>>,
    events: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Uploaded chunks in upload order
    pub fn chunks(&self) -> Vec<ChunkUpload> {
        lock(&self.chunks).clone()
    }

    /// Uploaded event batches in upload order
    pub fn events(&self) -> Vec<Vec<u8>> {
        lock(&self.events).clone()
    }

    /// All uploaded chunks concatenated in chunk order
    pub fn stream(&self) -> Vec<u8> {
        let mut chunks = self.chunks();
        chunks.sort_by_key(|c| c.chunk_id);
        chunks.into_iter().flat_map(|c| c.bytes).collect()
    }

    /// Poll until at least `count` chunks arrived or `timeout` elapses
    pub fn wait_for_chunks(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while lock(&self.chunks).len() < count {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl ChunkTransport for MemoryTransport {
    fn upload_chunk<'a>(&'a self, chunk: &'a ChunkUpload) -> TransportFuture<'a> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Status(503));
            }
            lock(&self.chunks).push(chunk.clone());
            Ok(())
        })
    }

    fn upload_events<'a>(&'a self, _session_id: &'a str, batch: &'a [u8]) -> TransportFuture<'a> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Status(503));
            }
            lock(&self.events).push(batch.to_vec());
            Ok(())
        })
    }
}

/// Run a future to completion on a throwaway runtime
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(future)
}

// ============================================================================
// Snapshot Builders
// ============================================================================

/// Active object at `position` with identity rotation and unit scale
pub fn object_at(instance_id: u32, prefab_id: u16, position: Vec3) -> TrackedObjectSnapshot {
    let mut obj = TrackedObjectSnapshot::default();
    obj.init(instance_id, prefab_id, 0);
    obj.set_transform(position, Quat::IDENTITY, Vec3::ONE);
    obj
}

/// Tick holding `objects`, timed as if produced at 20 Hz
pub fn tick_with(index: i64, objects: Vec<TrackedObjectSnapshot>) -> TickSnapshot {
    let mut tick = TickSnapshot::default();
    tick.init(index * 500_000, index as f32 * 0.05, 0.05);
    tick.objects = objects;
    tick
}
