//! Chunked binary session format
//!
//! A session is a concatenation of self-contained chunks. Every value is
//! little-endian; strings carry a 7-bit varint byte-length prefix.
//!
//! # Stream Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ ChunkHeader                                      │
//! │ ├─ endianness: i16 (always 1)                    │
//! │ ├─ format_version: i16                           │
//! │ ├─ app_version: string                           │
//! │ ├─ tick_rate_hz: i16                             │
//! │ └─ num_ticks: i32 (patched after the body)       │
//! ├──────────────────────────────────────────────────┤
//! │ VrHeader (first chunk of a session only)         │
//! ├──────────────────────────────────────────────────┤
//! │ TickEntry × num_ticks                            │
//! │ ├─ ObjectEntry × num_objects                     │
//! │ └─ DestroyObjectEntry × num_deleted              │
//! └──────────────────────────────────────────────────┘
//!   ... next chunk
//! ```
//!
//! Object entries are deltas: only fields flagged as new are present, and
//! identity transforms are flagged instead of written. The tracker state is
//! cleared on every flush, so the first entry of an object in a chunk always
//! carries its full transform.

mod chunk;
mod object;
mod reader;
mod tick;

pub use chunk::{ChunkHeader, ENDIANNESS_MARKER, FORMAT_VERSION, VrHeader};
pub use object::{ObjectEntry, ObjectFlags, ParamFlags, TextEntry};
pub use reader::WireReader;
pub use tick::{DestroyObjectEntry, TickEntry, TickFlags};

use std::io::{self, BufRead};

use crate::buffer::{BufferError, ByteBuffer};

/// Maximum number of items in any u8-counted list
pub const MAX_LIST_LEN: usize = u8::MAX as usize;

/// A stream whose header cannot be decoded by this version
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unsupported endianness marker {0} (expected 1)")]
    BadEndianness(i16),

    #[error("unsupported format version {0} (expected 1)")]
    UnsupportedVersion(i16),
}

/// Errors raised while decoding a stream
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of stream at byte {position}")]
    EndOfStream { position: u64 },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid string at byte {position}")]
    InvalidString { position: u64 },

    #[error("invalid bool value {value:#04x} at byte {position}")]
    InvalidBool { value: u8, position: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A record with a fixed binary layout
pub trait WireRecord: Sized {
    /// Append the record to `buf`
    ///
    /// On error the buffer may hold a partial record; callers roll back to
    /// the record start with [`ByteBuffer::truncate`].
    fn encode(&self, buf: &mut ByteBuffer) -> Result<(), BufferError>;

    /// Read the record from the current reader position
    fn decode<R: BufRead>(reader: &mut WireReader<R>) -> Result<Self, DecodeError>;
}

/// Clamp a list length to what fits in a u8 count
///
/// Items past the cap are not written; [`ObjectEntry::oversized_list`]
/// reports them so the caller can warn.
pub(crate) fn list_len(len: usize) -> u8 {
    len.min(MAX_LIST_LEN) as u8
}
