//! Insight CLI - Offline tooling for recorded session streams
//!
//! # Commands
//!
//! - `insight inspect` - Print a summary of a recorded stream
//! - `insight dump` - Write the decoded ticks as JSON
//! - `insight validate` - Fail unless the stream decodes completely
//!
//! # Inputs
//!
//! Every command takes a path to one of:
//! - a raw stream file (chunks concatenated)
//! - a directory of `*.bin` chunks, ordered by the trailing chunk number
//! - a session cache directory of base64 `*_chunk_N.txt` files
//!
//! ```bash
//! insight inspect recordings/20240501123000000
//! insight dump session.bin -o session.json
//! ```

mod dump;
mod inspect;
mod source;
mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Insight CLI - Offline tooling for recorded session streams
#[derive(Parser)]
#[command(name = "insight")]
#[command(about = "Inspect and validate recorded Insight sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print headers, tick and object counts, and any decode error
    Inspect {
        /// Stream file or chunk directory
        path: PathBuf,
    },

    /// Write the decoded ticks as JSON
    Dump {
        /// Stream file or chunk directory
        path: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Exit non-zero unless the stream decodes completely
    Validate {
        /// Stream file or chunk directory
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { path } => inspect::execute(path),
        Commands::Dump { path, output } => dump::execute(path, output),
        Commands::Validate { path } => validate::execute(path),
    }
}
