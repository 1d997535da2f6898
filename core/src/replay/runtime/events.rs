//! JSON event batch buffer
//!
//! Events are framed as
//! `{"batch":[{...},{...}],"timestamp":"...","sentAt":"..."}` directly in a
//! fixed-size [`ByteBuffer`]. The closing part is kept at the end of the
//! buffer with placeholder timestamps so the contents are always one write
//! away from a complete document; each new event overwrites the closing
//! part and re-appends it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::buffer::{BufferError, ByteBuffer};

const JSON_START: &[u8] = b"{\"batch\":[";
const JSON_END_PLACEHOLDER: &[u8] =
    b"],\"timestamp\":\"yyyy-MM-ddTHH:mm:ss.fffZ\",\"sentAt\":\"yyyy-MM-ddTHH:mm:ss.fffZ\"}";

/// A named marker recorded by the producer
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct EventRecord<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    name: &'a str,
    session: &'a str,
    timestamp: String,
}

/// Millisecond ISO-8601 UTC timestamp, always 24 characters
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Append-only buffer of serialized events
pub struct EventBuffer {
    buf: ByteBuffer,
    count: usize,
    last_flush: Instant,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: ByteBuffer::with_capacity(capacity),
            count: 0,
            last_flush: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one event
    ///
    /// The record must fit together with its separator and the closing part;
    /// otherwise nothing is written and the previous contents stay intact.
    pub fn push(
        &mut self,
        user_id: &str,
        session_id: &str,
        event: &RecordedEvent,
    ) -> Result<(), BufferError> {
        let record = EventRecord {
            user_id,
            name: &event.name,
            session: session_id,
            timestamp: format_timestamp(event.timestamp),
        };
        // Serializing a struct of strings cannot fail
        let json = serde_json::to_vec(&record).unwrap_or_default();

        let (body_end, prefix): (usize, &[u8]) = if self.is_empty() {
            (0, JSON_START)
        } else {
            (self.buf.offset() - JSON_END_PLACEHOLDER.len(), b",")
        };
        let needed = prefix.len() + json.len() + JSON_END_PLACEHOLDER.len();
        let available = self.buf.capacity() - body_end;
        if needed > available {
            return Err(BufferError::BufferFull {
                needed,
                remaining: available,
            });
        }

        self.buf.truncate(body_end);
        self.buf.write_raw(prefix)?;
        self.buf.write_raw(&json)?;
        self.buf.write_raw(JSON_END_PLACEHOLDER)?;
        self.count += 1;
        Ok(())
    }

    /// Whether a non-empty batch has waited at least `interval`
    pub fn should_flush(&self, interval: Duration) -> bool {
        !self.is_empty() && self.last_flush.elapsed() >= interval
    }

    /// Close the batch with real timestamps, copy it into `out`, and reset
    ///
    /// Returns `false` without touching `out` when there are no events.
    pub fn finish(&mut self, sent_at: DateTime<Utc>, out: &mut Vec<u8>) -> bool {
        self.last_flush = Instant::now();
        if self.is_empty() {
            return false;
        }

        let sent_at = format_timestamp(sent_at);
        let end = self.buf.offset();
        let result = self.buf.patch_at(end - JSON_END_PLACEHOLDER.len(), |buf| {
            buf.write_raw(b"],\"timestamp\":\"")?;
            buf.write_raw(sent_at.as_bytes())?;
            buf.write_raw(b"\",\"sentAt\":\"")?;
            buf.write_raw(sent_at.as_bytes())?;
            buf.write_raw(b"\"}")
        });
        debug_assert!(result.is_ok(), "timestamps must match the placeholder width");

        out.extend_from_slice(self.buf.as_slice());
        self.buf.reset();
        self.count = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(name: &str) -> RecordedEvent {
        RecordedEvent {
            name: name.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_timestamp_width_matches_placeholder() {
        let ts = format_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
        assert_eq!(ts, "2024-05-01T12:30:00.000Z");
        assert_eq!(ts.len(), "yyyy-MM-ddTHH:mm:ss.fffZ".len());
    }

    #[test]
    fn test_batch_is_valid_json() {
        let mut events = EventBuffer::new(4096);
        events.push("u1", "s1", &event("start")).unwrap();
        events.push("u1", "s1", &event("grab \"cube\"")).unwrap();
        assert_eq!(events.len(), 2);

        let mut out = Vec::new();
        let sent = Utc.with_ymd_and_hms(2024, 5, 1, 12, 31, 0).unwrap();
        assert!(events.finish(sent, &mut out));
        assert!(events.is_empty());

        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let batch = doc["batch"].as_array().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["userId"], "u1");
        assert_eq!(batch[1]["name"], "grab \"cube\"");
        assert_eq!(batch[0]["timestamp"], "2024-05-01T12:30:00.000Z");
        assert_eq!(doc["sentAt"], "2024-05-01T12:31:00.000Z");
    }

    #[test]
    fn test_full_buffer_keeps_previous_events() {
        let mut events = EventBuffer::new(200);
        events.push("u", "s", &event("first")).unwrap();
        let before = events.buf.as_slice().to_vec();

        let err = events.push("u", "s", &event(&"x".repeat(150))).unwrap_err();
        assert!(matches!(err, BufferError::BufferFull { .. }));
        assert_eq!(events.len(), 1);
        assert_eq!(events.buf.as_slice(), &before[..]);

        let mut out = Vec::new();
        assert!(events.finish(Utc::now(), &mut out));
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let batch = doc["batch"].as_array().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["name"], "first");
    }

    #[test]
    fn test_oversize_first_event_leaves_buffer_empty() {
        let mut events = EventBuffer::new(64);
        assert!(events.push("u", "s", &event("first")).is_err());
        assert!(events.is_empty());
        assert!(events.buf.is_empty());

        let mut out = Vec::new();
        assert!(!events.finish(Utc::now(), &mut out));
    }

    #[test]
    fn test_push_after_overflow_still_parses() {
        let mut events = EventBuffer::new(300);
        events.push("u", "s", &event("a")).unwrap();
        assert!(events.push("u", "s", &event(&"y".repeat(100))).is_err());
        events.push("u", "s", &event("b")).unwrap();

        let mut out = Vec::new();
        events.finish(Utc::now(), &mut out);
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let names: Vec<&str> = doc["batch"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_buffer_does_not_flush() {
        let mut events = EventBuffer::new(256);
        assert!(!events.should_flush(Duration::ZERO));
        let mut out = Vec::new();
        assert!(!events.finish(Utc::now(), &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn test_should_flush_after_interval() {
        let mut events = EventBuffer::new(256);
        events.push("u", "s", &event("tick")).unwrap();
        assert!(events.should_flush(Duration::ZERO));
        assert!(!events.should_flush(Duration::from_secs(3600)));
    }
}
