//! Base64 text cache of recorded sessions
//!
//! Every chunk of a session is written as
//! `{root}/{session}/{session}_chunk_{id}.txt`. Loading a session decodes
//! the files in chunk order and concatenates them back into one stream.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// On-disk cache of session chunks
#[derive(Debug, Clone)]
pub struct SessionCache {
    root: PathBuf,
}

/// Chunk id of a `{session}_chunk_{id}.txt` file
fn chunk_id_of(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".txt")?;
    let (_, id) = stem.rsplit_once("_chunk_")?;
    id.parse().ok()
}

impl SessionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Store one chunk as base64 text
    pub fn write_chunk(&self, session_id: &str, chunk_id: u32, bytes: &[u8]) -> io::Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}_chunk_{}.txt", session_id, chunk_id));
        fs::write(&path, STANDARD.encode(bytes))?;
        Ok(path)
    }

    /// Ids of all cached sessions, sorted
    pub fn sessions(&self) -> io::Result<Vec<String>> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    sessions.push(name.to_string());
                }
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Rebuild the byte stream of a cached session
    pub fn load_stream(&self, session_id: &str) -> io::Result<Vec<u8>> {
        load_session_dir(&self.session_dir(session_id))
    }
}

/// Decode and concatenate every `*_chunk_{id}.txt` file in `dir`
///
/// Files are ordered by chunk id. A file whose content is not valid base64
/// is skipped with a warning.
pub fn load_session_dir(dir: &Path) -> io::Result<Vec<u8>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(id) = path.file_name().and_then(|n| n.to_str()).and_then(chunk_id_of) {
            files.push((id, path));
        }
    }
    files.sort_by_key(|(id, _)| *id);

    let mut stream = Vec::new();
    for (id, path) in files {
        let text = fs::read_to_string(&path)?;
        match STANDARD.decode(text.trim()) {
            Ok(bytes) => stream.extend_from_slice(&bytes),
            Err(e) => warn!(chunk = id, path = %path.display(), "Skipping invalid cached chunk: {}", e),
        }
    }
    Ok(stream)
}
