//! Recording runtime
//!
//! This module contains the live half of the recorder:
//! - **Recorder**: producer-facing handle and lifecycle
//! - **Worker**: background thread that diffs, encodes, and flushes chunks
//! - **Events**: JSON batch buffer for named events
//! - **Dispatch**: fire-and-forget uploads with a failed-chunk retry sweep
//!
//! ```text
//! producer ──end_tick──▶ [mutex: queues + pools] ──swap──▶ worker ──chunk──▶ transport
//!                                    ▲                        │
//!                                    └────── release ◀────────┘
//! ```

mod dispatch;
mod events;
mod metrics;
mod queue;
mod recorder;
mod worker;


pub use events::{EventBuffer, RecordedEvent, format_timestamp};
pub use metrics::RecorderStats;
pub use recorder::{Recorder, RecorderError, RecorderState};
