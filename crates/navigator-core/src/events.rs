//! Event records produced while a run is decoded.
//!
//! Every line read from a child process becomes exactly one [`EventRecord`].
//! Structured lines become play/task/result/stats records; everything else is
//! kept verbatim as raw text, and structured lines with an unknown tag become
//! decode errors carrying the original text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Timestamp, now};

/// Per-run sequence number. Assigned by the decoder, never reused.
pub type Sequence = u64;

/// Which channel a raw text line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineOrigin {
    /// Primary channel of the child process
    Stdout,
    /// Diagnostic channel of the child process
    Stderr,
    /// Written by navigator itself (launch failures)
    Supervisor,
}

impl std::fmt::Display for LineOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::Supervisor => write!(f, "navigator"),
        }
    }
}

/// Outcome of one task on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    #[default]
    Ok,
    Changed,
    Skipped,
    Failed,
    Unreachable,
}

impl TaskOutcome {
    /// Parse an outcome name as it appears on the wire.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ok" | "success" | "successful" => Some(Self::Ok),
            "changed" => Some(Self::Changed),
            "skipped" | "skip" => Some(Self::Skipped),
            "failed" | "failure" | "failures" => Some(Self::Failed),
            "unreachable" | "dark" => Some(Self::Unreachable),
            _ => None,
        }
    }

    /// Returns true for failed and unreachable outcomes.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Unreachable)
    }

    /// Lowercase name used in attributes and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Changed => "changed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Unreachable => "unreachable",
        }
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The content of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A play began
    PlayStarted { play_id: String, name: String },
    /// A task began within a play
    TaskStarted {
        task_id: String,
        #[serde(default)]
        play_id: Option<String>,
        name: String,
        #[serde(default)]
        action: Option<String>,
    },
    /// A task finished on one host
    TaskResult {
        task_id: String,
        host: String,
        outcome: TaskOutcome,
        #[serde(default)]
        detail: Value,
    },
    /// End-of-run statistics
    RunStats { stats: Map<String, Value> },
    /// A line that was not a structured record
    RawText { origin: LineOrigin, line: String },
    /// A structured line that could not be interpreted
    DecodeError { line: String, reason: String },
}

impl EventPayload {
    /// Short kind name for logs and display.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::PlayStarted { .. } => "play_started",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskResult { .. } => "task_result",
            Self::RunStats { .. } => "run_stats",
            Self::RawText { .. } => "raw_text",
            Self::DecodeError { .. } => "decode_error",
        }
    }
}

/// One sequence-numbered unit of run output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: Sequence,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl EventRecord {
    /// Create a record stamped with the current time.
    pub fn new(seq: Sequence, payload: EventPayload) -> Self {
        Self {
            seq,
            timestamp: now(),
            payload,
        }
    }

    /// Create a record with an explicit timestamp.
    pub fn at(seq: Sequence, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            seq,
            timestamp,
            payload,
        }
    }

    /// Returns true if this record represents a decoding anomaly.
    pub fn is_anomaly(&self) -> bool {
        matches!(self.payload, EventPayload::DecodeError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_wire() {
        assert_eq!(TaskOutcome::from_wire("OK"), Some(TaskOutcome::Ok));
        assert_eq!(TaskOutcome::from_wire("failures"), Some(TaskOutcome::Failed));
        assert_eq!(TaskOutcome::from_wire("dark"), Some(TaskOutcome::Unreachable));
        assert_eq!(TaskOutcome::from_wire("pending"), None);
    }

    #[test]
    fn test_outcome_ordering_by_severity() {
        assert!(TaskOutcome::Unreachable > TaskOutcome::Failed);
        assert!(TaskOutcome::Failed > TaskOutcome::Changed);
        assert!(TaskOutcome::Unreachable.is_failure());
        assert!(!TaskOutcome::Skipped.is_failure());
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let record = EventRecord::new(
            3,
            EventPayload::RawText {
                origin: LineOrigin::Stderr,
                line: "warning".into(),
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["payload"]["kind"], "raw_text");
        assert_eq!(json["payload"]["origin"], "stderr");

        let back: EventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert!(!back.is_anomaly());
    }
}
