//! Append-only per-trial event timeline
//!
//! Each trial owns a `timeline.jsonl` log of `{ts, event, payload}` records.
//! The in-memory buffer is the source of truth returned to clients; the
//! on-disk append is best-effort and never fails the request. The log is
//! never rewritten or compacted.

use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A scalar timeline payload value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    /// Boolean flag
    Bool(bool),
    /// Integer count or id
    Int(i64),
    /// Seconds, rates, scores
    Float(f64),
    /// Paths, snippets, tags
    Str(String),
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for PayloadValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PayloadValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Ordered key/value payload attached to a timeline event.
///
/// Kept as an insertion-ordered list rather than a map so serialization is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload(Vec<(String, PayloadValue)>);

impl Payload {
    /// Empty payload
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, preserving insertion order
    #[must_use]
    pub fn field(mut self, key: &str, value: impl Into<PayloadValue>) -> Self {
        self.0.push((key.to_string(), value.into()));
        self
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a field by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl Serialize for Payload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PayloadVisitor;

        impl<'de> serde::de::Visitor<'de> for PayloadVisitor {
            type Value = Payload;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of scalar payload fields")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<Self::Value, A::Error> {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, PayloadValue>()? {
                    fields.push((key, value));
                }
                Ok(Payload(fields))
            }
        }

        deserializer.deserialize_map(PayloadVisitor)
    }
}

/// One recorded timeline event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Seconds since the Unix epoch
    pub ts: f64,
    /// Event name tag (open set: `pipeline_start`, `stt_end`, ...)
    pub event: String,
    /// Ordered event payload
    pub payload: Payload,
}

/// Append-only event recorder for one trial.
///
/// Events are buffered in memory and mirrored to the JSONL log. A failed
/// disk append logs a warning and keeps going.
#[derive(Debug)]
pub struct Timeline {
    path: PathBuf,
    events: Vec<TimelineEvent>,
}

impl Timeline {
    /// Open a timeline backed by the given log file (created on first append)
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            events: Vec::new(),
        }
    }

    /// Record an event with the current timestamp.
    ///
    /// Timestamps are clamped so the sequence never decreases even if the
    /// system clock steps backwards.
    pub fn record(&mut self, event: &str, payload: Payload) {
        let mut ts = epoch_now();
        if let Some(last) = self.events.last() {
            if ts < last.ts {
                ts = last.ts;
            }
        }

        let record = TimelineEvent {
            ts,
            event: event.to_string(),
            payload,
        };

        if let Err(e) = self.append_durable(&record) {
            tracing::warn!(error = %e, path = %self.path.display(), "timeline append failed");
        }
        self.events.push(record);
    }

    fn append_durable(&self, record: &TimelineEvent) -> crate::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// All events recorded so far, in order
    #[must_use]
    pub fn snapshot(&self) -> Vec<TimelineEvent> {
        self.events.clone()
    }
}

/// Current time as seconds since the Unix epoch
pub(crate) fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_ordered_and_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut tl = Timeline::open(dir.path().join("timeline.jsonl"));

        tl.record("pipeline_start", Payload::new());
        tl.record("stt_start", Payload::new().field("lang", "en"));
        tl.record("stt_end", Payload::new());

        let events = tl.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, "pipeline_start");
        assert_eq!(events[1].event, "stt_start");
        assert_eq!(events[2].event, "stt_end");
        assert!(events.windows(2).all(|w| w[0].ts <= w[1].ts));
    }

    #[test]
    fn snapshot_grows_with_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut tl = Timeline::open(dir.path().join("timeline.jsonl"));
        for i in 0..5 {
            assert_eq!(tl.snapshot().len(), i);
            tl.record("tick", Payload::new());
        }
        assert_eq!(tl.snapshot().len(), 5);
    }

    #[test]
    fn durable_log_is_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.jsonl");
        let mut tl = Timeline::open(&path);
        tl.record("stt_end", Payload::new().field("asr_text_path", "a/b.txt"));
        tl.record("pipeline_end", Payload::new().field("processing_time", 1.25));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: TimelineEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event, "stt_end");
        assert_eq!(
            first.payload.get("asr_text_path"),
            Some(&PayloadValue::Str("a/b.txt".to_string()))
        );
    }

    #[test]
    fn append_failure_keeps_in_memory_record() {
        // Point the log at a directory that does not exist.
        let mut tl = Timeline::open("/nonexistent-voxline-dir/timeline.jsonl");
        tl.record("pipeline_start", Payload::new());
        assert_eq!(tl.snapshot().len(), 1);
    }

    #[test]
    fn payload_serializes_in_insertion_order() {
        let payload = Payload::new()
            .field("zeta", 1i64)
            .field("alpha", "x")
            .field("mid", true);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":"x","mid":true}"#);
    }
}
