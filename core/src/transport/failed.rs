//! Local storage for chunks that could not be delivered
//!
//! Files are named `{session_id}_{chunk_id}.bin` and hold the raw chunk
//! bytes. A retry sweep re-uploads every stored file and deletes the ones
//! that went through.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ChunkTransport, ChunkUpload};

/// A chunk waiting on disk for another upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChunk {
    pub path: PathBuf,
    pub session_id: String,
    pub chunk_id: u32,
}

/// Outcome of one retry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
}

/// Directory of chunks that failed to upload
#[derive(Debug, Clone)]
pub struct FailedChunkStore {
    dir: PathBuf,
}

/// Split `{session}_{chunk}.bin` into its parts
///
/// The session id may itself contain underscores; the chunk id is whatever
/// follows the last one.
fn parse_file_name(name: &str) -> Option<(String, u32)> {
    let stem = name.strip_suffix(".bin")?;
    let (session, chunk) = stem.rsplit_once('_')?;
    if session.is_empty() {
        return None;
    }
    Some((session.to_string(), chunk.parse().ok()?))
}

impl FailedChunkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a chunk for a later retry
    ///
    /// The bytes go to a `.tmp` file first and are renamed into place, so a
    /// concurrent sweep only ever sees complete chunks.
    pub fn save(&self, session_id: &str, chunk_id: u32, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let name = format!("{}_{}.bin", session_id, chunk_id);
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        debug!(path = %path.display(), "Saved failed chunk");
        Ok(path)
    }

    /// Stored chunks in session, then chunk order
    ///
    /// Files that do not follow the naming scheme are ignored.
    pub fn list(&self) -> io::Result<Vec<FailedChunk>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut chunks = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match parse_file_name(name) {
                Some((session_id, chunk_id)) => chunks.push(FailedChunk {
                    path: path.clone(),
                    session_id,
                    chunk_id,
                }),
                None => debug!(file = name, "Skipping unrecognized file in failed chunk dir"),
            }
        }
        chunks.sort_by(|a, b| (&a.session_id, a.chunk_id).cmp(&(&b.session_id, b.chunk_id)));
        Ok(chunks)
    }

    /// Re-upload every stored chunk, deleting those that were delivered
    pub async fn retry_all(&self, transport: &dyn ChunkTransport) -> RetryReport {
        let mut report = RetryReport::default();
        let chunks = match self.list() {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(dir = %self.dir.display(), "Failed to list failed chunks: {}", e);
                return report;
            }
        };

        for chunk in chunks {
            let bytes = match fs::read(&chunk.path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %chunk.path.display(), "Failed to read stored chunk: {}", e);
                    continue;
                }
            };
            report.attempted += 1;

            let upload = ChunkUpload {
                session_id: chunk.session_id,
                chunk_id: chunk.chunk_id,
                bytes,
                is_last: false,
                first_tick_time: 0,
                last_tick_time: 0,
            };
            match transport.upload_chunk(&upload).await {
                Ok(()) => {
                    report.delivered += 1;
                    if let Err(e) = fs::remove_file(&chunk.path) {
                        warn!(path = %chunk.path.display(), "Failed to delete retried chunk: {}", e);
                    }
                }
                Err(e) => {
                    debug!(chunk = upload.chunk_id, "Retry failed: {}", e);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryTransport, block_on};
    use tempfile::tempdir;

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("abc_3.bin"), Some(("abc".into(), 3)));
        assert_eq!(
            parse_file_name("2024_01_01_12.bin"),
            Some(("2024_01_01".into(), 12))
        );
        assert_eq!(parse_file_name("abc_x.bin"), None);
        assert_eq!(parse_file_name("abc_3.txt"), None);
        assert_eq!(parse_file_name("_3.bin"), None);
        assert_eq!(parse_file_name("noseparator.bin"), None);
    }

    #[test]
    fn test_save_and_list_sorted() {
        let dir = tempdir().unwrap();
        let store = FailedChunkStore::new(dir.path().join("failed"));
        store.save("s", 10, &[1]).unwrap();
        store.save("s", 2, &[2]).unwrap();
        fs::write(store.dir().join("notes.txt"), "ignore me").unwrap();

        let chunks = store.list().unwrap();
        let ids: Vec<_> = chunks.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![2, 10]);
        assert_eq!(fs::read(&chunks[1].path).unwrap(), vec![1]);
    }

    #[test]
    fn test_partial_writes_are_never_retried() {
        let dir = tempdir().unwrap();
        let store = FailedChunkStore::new(dir.path());
        // A save still in progress
        fs::write(dir.path().join("s_4.bin.tmp"), []).unwrap();
        assert!(store.list().unwrap().is_empty());

        let transport = MemoryTransport::new();
        let report = block_on(store.retry_all(&transport));
        assert_eq!(report.attempted, 0);
        assert!(transport.chunks().is_empty());
        assert!(dir.path().join("s_4.bin.tmp").exists());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = FailedChunkStore::new(dir.path());
        store.save("s", 1, &[1, 2, 3]).unwrap();
        store.save("s", 1, &[4]).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["s_1.bin".to_string()]);
        assert_eq!(fs::read(dir.path().join("s_1.bin")).unwrap(), vec![4]);
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let dir = tempdir().unwrap();
        let store = FailedChunkStore::new(dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_retry_deletes_delivered_chunks() {
        let dir = tempdir().unwrap();
        let store = FailedChunkStore::new(dir.path());
        store.save("s", 0, &[7, 7]).unwrap();
        store.save("s", 1, &[8]).unwrap();

        let transport = MemoryTransport::new();
        let report = block_on(store.retry_all(&transport));
        assert_eq!(report, RetryReport { attempted: 2, delivered: 2 });
        assert!(store.list().unwrap().is_empty());

        let chunks = transport.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].bytes, vec![7, 7]);
    }

    #[test]
    fn test_retry_keeps_chunks_when_upload_fails() {
        let dir = tempdir().unwrap();
        let store = FailedChunkStore::new(dir.path());
        store.save("s", 0, &[1]).unwrap();

        let transport = MemoryTransport::new();
        transport.set_failing(true);
        let report = block_on(store.retry_all(&transport));
        assert_eq!(report, RetryReport { attempted: 1, delivered: 0 });
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
