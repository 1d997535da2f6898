//! Loading recorded streams from disk

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use insight_core::replay::{DecodedReplay, ReplayDecoder};
use insight_core::transport::load_session_dir;

/// Number at the end of a file stem (`chunk_000012` -> 12)
fn trailing_number(stem: &str) -> Option<u64> {
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    stem[stem.len() - digits..].parse().ok()
}

/// `*.bin` files in `dir` that end in a chunk number, in chunk order
fn chunk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("bin") {
            continue;
        }
        if let Some(n) = path.file_stem().and_then(|s| s.to_str()).and_then(trailing_number) {
            files.push((n, path));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Read a stream file or reassemble one from a chunk directory
pub fn load_stream(path: &Path) -> Result<Vec<u8>> {
    if path.is_file() {
        return fs::read(path).with_context(|| format!("Failed to read {}", path.display()));
    }
    if !path.is_dir() {
        bail!("No such file or directory: {}", path.display());
    }

    let files = chunk_files(path)?;
    if !files.is_empty() {
        debug!(chunks = files.len(), "Loading binary chunk directory");
        let mut stream = Vec::new();
        for file in files {
            stream.extend(fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?);
        }
        return Ok(stream);
    }

    let stream = load_session_dir(path)
        .with_context(|| format!("Failed to read session cache {}", path.display()))?;
    if stream.is_empty() {
        bail!("No chunks found in {}", path.display());
    }
    Ok(stream)
}

/// Load and decode `path`
pub fn decode(path: &Path) -> Result<DecodedReplay> {
    let stream = load_stream(path)?;
    Ok(ReplayDecoder::default().decode(&stream))
}
