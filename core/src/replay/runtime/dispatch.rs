//! Upload dispatch
//!
//! Finished chunks and event batches are handed to the transport as
//! fire-and-forget tasks on a small tokio runtime owned by the dispatcher.
//! Byte arrays come from a shared pool and go back to it when the task ends,
//! whether or not the upload succeeded. Chunks that fail are written to the
//! [`FailedChunkStore`], which a periodic sweep retries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{LogLevel, RecorderConfig};
use crate::pool::ObjectPool;
use crate::transport::{ChunkTransport, ChunkUpload, FailedChunkStore, SessionCache};

type BytePool = Arc<Mutex<ObjectPool<Vec<u8>>>>;

fn lock_pool(pool: &BytePool) -> MutexGuard<'_, ObjectPool<Vec<u8>>> {
    pool.lock().unwrap_or_else(|e| {
        warn!("Byte pool mutex poisoned; continuing");
        e.into_inner()
    })
}

fn persist(store: Option<&FailedChunkStore>, upload: &ChunkUpload, log_level: LogLevel) {
    let Some(store) = store else {
        if log_level.allows(LogLevel::Error) {
            tracing::error!(chunk = upload.chunk_id, "No failed chunk directory, chunk lost");
        }
        return;
    };
    if let Err(e) = store.save(&upload.session_id, upload.chunk_id, &upload.bytes) {
        if log_level.allows(LogLevel::Error) {
            tracing::error!(chunk = upload.chunk_id, "Failed to save chunk for retry: {}", e);
        }
    }
}

pub(super) struct UploadDispatcher {
    runtime: Runtime,
    transport: Arc<dyn ChunkTransport>,
    byte_pool: BytePool,
    failed: Option<Arc<FailedChunkStore>>,
    cache: Option<SessionCache>,
    outstanding: Arc<AtomicUsize>,
    max_outstanding: usize,
    log_level: LogLevel,
    retry_task: Option<JoinHandle<()>>,
}

impl UploadDispatcher {
    pub fn new(config: &RecorderConfig, transport: Arc<dyn ChunkTransport>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("insight-upload")
            .enable_time()
            .build()?;

        let pool_capacity = config.expected_max_ticks_in_flight.max(1) * 2;
        let mut byte_pool = ObjectPool::new("upload bytes", pool_capacity);
        byte_pool.set_log_level(config.log_level);
        let failed = config
            .resolved_failed_chunks_dir()
            .map(|dir| Arc::new(FailedChunkStore::new(dir)));

        Ok(Self {
            runtime,
            transport,
            byte_pool: Arc::new(Mutex::new(byte_pool)),
            failed,
            cache: config.session_cache_dir.as_ref().map(SessionCache::new),
            outstanding: Arc::new(AtomicUsize::new(0)),
            max_outstanding: config.max_outstanding_uploads.max(1),
            log_level: config.log_level,
            retry_task: None,
        })
    }

    /// Copy `bytes` into a pooled array
    pub fn take_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        let mut out = lock_pool(&self.byte_pool).acquire();
        out.extend_from_slice(bytes);
        out
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Start uploading a chunk in the background
    ///
    /// With too many uploads in flight the chunk goes straight to the failed
    /// chunk store instead.
    pub fn dispatch_chunk(&self, upload: ChunkUpload) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.write_chunk(&upload.session_id, upload.chunk_id, &upload.bytes) {
                if self.log_level.allows(LogLevel::Warning) {
                    warn!(chunk = upload.chunk_id, "Failed to cache chunk: {}", e);
                }
            }
        }

        if self.outstanding() >= self.max_outstanding {
            if self.log_level.allows(LogLevel::Warning) {
                warn!(
                    chunk = upload.chunk_id,
                    limit = self.max_outstanding,
                    "Too many uploads in flight, saving chunk for retry"
                );
            }
            persist(self.failed.as_deref(), &upload, self.log_level);
            lock_pool(&self.byte_pool).release(upload.bytes);
            return;
        }

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let transport = Arc::clone(&self.transport);
        let failed = self.failed.clone();
        let pool = Arc::clone(&self.byte_pool);
        let outstanding = Arc::clone(&self.outstanding);
        let log_level = self.log_level;

        self.runtime.spawn(async move {
            match transport.upload_chunk(&upload).await {
                Ok(()) => debug!(chunk = upload.chunk_id, bytes = upload.bytes.len(), "Chunk uploaded"),
                Err(e) => {
                    if log_level.allows(LogLevel::Warning) {
                        warn!(chunk = upload.chunk_id, "Chunk upload failed: {}", e);
                    }
                    persist(failed.as_deref(), &upload, log_level);
                }
            }
            lock_pool(&pool).release(upload.bytes);
            outstanding.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Start uploading an event batch in the background
    ///
    /// Failed batches are logged and dropped.
    pub fn dispatch_events(&self, session_id: String, batch: Vec<u8>) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let transport = Arc::clone(&self.transport);
        let pool = Arc::clone(&self.byte_pool);
        let outstanding = Arc::clone(&self.outstanding);
        let log_level = self.log_level;

        self.runtime.spawn(async move {
            if let Err(e) = transport.upload_events(&session_id, &batch).await {
                if log_level.allows(LogLevel::Warning) {
                    warn!(session = %session_id, "Event batch upload failed: {}", e);
                }
            }
            lock_pool(&pool).release(batch);
            outstanding.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Retry stored chunks now and then every `interval`
    pub fn start_retry_sweep(&mut self, interval: Duration) {
        let Some(store) = self.failed.clone() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let log_level = self.log_level;
        let period = interval.max(Duration::from_millis(1));

        self.retry_task = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let report = store.retry_all(transport.as_ref()).await;
                if report.attempted > 0 && log_level.allows(LogLevel::Info) {
                    info!(
                        attempted = report.attempted,
                        delivered = report.delivered,
                        "Retried failed chunks"
                    );
                }
            }
        }));
    }

    /// Block until every upload has finished and its bytes are back in the
    /// pool, or `timeout` elapses
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.outstanding() == 0 && lock_pool(&self.byte_pool).outstanding_count() == 0;
            if idle {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for UploadDispatcher {
    fn drop(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }
}
