//! Chunk delivery
//!
//! The recorder hands finished chunks and event batches to a
//! [`ChunkTransport`]. Uploads run on the recorder's async runtime so a slow
//! endpoint never stalls encoding. Chunks that fail to upload are kept by a
//! [`FailedChunkStore`] and retried later; a [`SessionCache`] can additionally
//! keep a text copy of every chunk on disk.

mod cache;
mod failed;

pub use cache::{SessionCache, load_session_dir};
pub use failed::{FailedChunk, FailedChunkStore, RetryReport};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

/// Errors reported by a transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// A finished chunk ready for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkUpload {
    pub session_id: String,
    /// Position of the chunk in the session, starting at 0
    pub chunk_id: u32,
    pub bytes: Vec<u8>,
    /// The terminating chunk sent when recording stops
    pub is_last: bool,
    /// Time of the first tick in the chunk (0 if the chunk has no ticks)
    pub first_tick_time: i64,
    pub last_tick_time: i64,
}

/// Boxed future returned by transport methods
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Destination for chunks and event batches
pub trait ChunkTransport: Send + Sync {
    /// Deliver one chunk
    fn upload_chunk<'a>(&'a self, chunk: &'a ChunkUpload) -> TransportFuture<'a>;

    /// Deliver one JSON event batch
    fn upload_events<'a>(&'a self, session_id: &'a str, batch: &'a [u8]) -> TransportFuture<'a>;
}

/// Transport that stores everything in a local directory
///
/// Chunks land in `{root}/{session}/chunk_{id:06}.bin` and event batches in
/// `{root}/{session}/events_{n:06}.json`. Concatenating the chunk files in
/// name order yields a decodable stream.
pub struct DirectoryTransport {
    root: PathBuf,
    event_batches: AtomicU64,
}

impl DirectoryTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            event_batches: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> std::io::Result<PathBuf> {
        let dir = self.root.join(session_id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl ChunkTransport for DirectoryTransport {
    fn upload_chunk<'a>(&'a self, chunk: &'a ChunkUpload) -> TransportFuture<'a> {
        Box::pin(async move {
            let dir = self.session_dir(&chunk.session_id)?;
            std::fs::write(dir.join(format!("chunk_{:06}.bin", chunk.chunk_id)), &chunk.bytes)?;
            Ok(())
        })
    }

    fn upload_events<'a>(&'a self, session_id: &'a str, batch: &'a [u8]) -> TransportFuture<'a> {
        Box::pin(async move {
            let dir = self.session_dir(session_id)?;
            let n = self.event_batches.fetch_add(1, Ordering::Relaxed);
            std::fs::write(dir.join(format!("events_{:06}.json", n)), batch)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::block_on;
    use tempfile::tempdir;

    #[test]
    fn test_directory_transport_layout() {
        let dir = tempdir().unwrap();
        let transport = DirectoryTransport::new(dir.path());
        let chunk = ChunkUpload {
            session_id: "s1".into(),
            chunk_id: 3,
            bytes: vec![1, 2, 3],
            is_last: false,
            first_tick_time: 0,
            last_tick_time: 0,
        };

        block_on(transport.upload_chunk(&chunk)).unwrap();
        block_on(transport.upload_events("s1", b"{}")).unwrap();

        let session = dir.path().join("s1");
        assert_eq!(std::fs::read(session.join("chunk_000003.bin")).unwrap(), vec![1, 2, 3]);
        assert_eq!(std::fs::read(session.join("events_000000.json")).unwrap(), b"{}");
    }
}
