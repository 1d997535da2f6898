//! Insight Core - VR session recording
//!
//! This crate records the state of tracked objects in a VR session as a
//! compact chunked binary stream and decodes such streams back into a full
//! per-tick history.
//!
//! # Architecture
//!
//! - [`buffer::ByteBuffer`] - Fixed-capacity write buffer with rollback and patching
//! - [`pool::ObjectPool`] - Reusable instance pools for the recording hot path
//! - [`replay::Recorder`] - Producer handle feeding the background encoder
//! - [`replay::ReplayDecoder`] - Stream decoder with carry-forward of unchanged state
//! - [`transport::ChunkTransport`] - Destination for finished chunks

pub mod buffer;
pub mod config;
#[cfg(test)]
mod integration;
pub mod pool;
pub mod replay;
#[cfg(test)]
pub mod test_utils;
pub mod transport;

// Re-export core types
pub use buffer::{BufferError, ByteBuffer};
pub use config::{LogLevel, RecorderConfig};
pub use replay::{DecodedReplay, Recorder, RecorderError, ReplayDecoder};
pub use transport::{ChunkTransport, ChunkUpload, DirectoryTransport, TransportError};
