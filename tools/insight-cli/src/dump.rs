//! Write a decoded stream as JSON

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::source;

/// Decode `path` and write the ticks to `output` (stdout if `None`)
pub fn execute(path: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let replay = source::decode(&path)?;
    if let Some(error) = &replay.error {
        warn!("Stream is incomplete, dumping {} ticks: {}", replay.ticks.len(), error);
    }

    match output {
        Some(out) => {
            let file = File::create(&out).with_context(|| format!("Failed to create {}", out.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &replay).context("Failed to serialize ticks")?;
            writer.flush()?;
            info!("Wrote {} ticks to {}", replay.ticks.len(), out.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            serde_json::to_writer_pretty(&mut writer, &replay).context("Failed to serialize ticks")?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
