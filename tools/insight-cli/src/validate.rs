//! Check that a stream decodes completely

use anyhow::{Result, bail};
use std::path::PathBuf;

use crate::source;

/// Decode `path`, failing on the first decode error
pub fn execute(path: PathBuf) -> Result<()> {
    println!("Validating: {}", path.display());

    let replay = source::decode(&path)?;
    if let Some(error) = replay.error {
        bail!("Stream invalid after {} ticks: {}", replay.ticks.len(), error);
    }

    println!();
    println!("=== Stream Valid ===");
    println!("Chunks: {}", replay.chunks);
    println!("Ticks: {}", replay.ticks.len());
    Ok(())
}
