//! Event stream decoder.
//!
//! Splits the raw bytes of a run into newline-delimited lines and turns each
//! line into one [`EventRecord`]. Stdout lines are tried as structured JSON
//! events first; anything that is not a JSON object with an `event` field is
//! kept verbatim as raw text. Stderr lines are always raw text.
//!
//! Both ansible-runner style events (`playbook_on_task_start`,
//! `runner_on_ok`, ...) and the short tags (`task-start`, `task-result`, ...)
//! are understood. Fields are looked up in `event_data` first, then at the
//! top level of the object.
//!
//! A line split across several feeds is buffered until its newline arrives,
//! so the records produced never depend on how the input was chunked.

use navigator_core::{EventPayload, EventRecord, LineOrigin, Sequence, TaskOutcome};
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::launcher::StreamKind;

/// Keys of a stats event that are bookkeeping rather than statistics.
const STATS_BOOKKEEPING: &[&str] = &["playbook", "playbook_uuid", "uuid", "artifact_data"];

/// Incremental decoder for one run.
///
/// Holds one partial-line buffer per stream and a single sequence counter, so
/// records from stdout and stderr share one strictly increasing order.
#[derive(Debug)]
pub struct EventDecoder {
    stdout_tail: Vec<u8>,
    stderr_tail: Vec<u8>,
    next_seq: Sequence,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder {
    /// Create a decoder whose first record has sequence number 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a decoder with an explicit first sequence number.
    pub fn starting_at(first: Sequence) -> Self {
        Self {
            stdout_tail: Vec::new(),
            stderr_tail: Vec::new(),
            next_seq: first,
        }
    }

    /// Sequence number the next record will receive.
    pub fn next_sequence(&self) -> Sequence {
        self.next_seq
    }

    /// Feed bytes from the structured (stdout) stream.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<EventRecord> {
        self.feed_stream(StreamKind::Stdout, bytes)
    }

    /// Feed bytes from either stream. Returns one record per completed line.
    pub fn feed_stream(&mut self, stream: StreamKind, bytes: &[u8]) -> Vec<EventRecord> {
        let tail = self.tail_mut(stream);
        tail.extend_from_slice(bytes);

        let Some(last_newline) = tail.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = tail.drain(..=last_newline).collect();

        complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(|line| self.decode_line(stream, line))
            .collect()
    }

    /// Drain the partial lines of both streams, stdout first.
    pub fn flush(&mut self) -> Vec<EventRecord> {
        let mut records = self.flush_stream(StreamKind::Stdout);
        records.extend(self.flush_stream(StreamKind::Stderr));
        records
    }

    /// Drain the partial line of one stream, if any.
    pub fn flush_stream(&mut self, stream: StreamKind) -> Vec<EventRecord> {
        let tail = std::mem::take(self.tail_mut(stream));
        if tail.is_empty() {
            return Vec::new();
        }
        trace!(%stream, bytes = tail.len(), "Flushing partial line");
        vec![self.decode_line(stream, &tail)]
    }

    /// Record a diagnostic line written by navigator itself.
    pub fn supervisor_line(&mut self, text: impl Into<String>) -> EventRecord {
        let seq = self.take_seq();
        EventRecord::new(
            seq,
            EventPayload::RawText {
                origin: LineOrigin::Supervisor,
                line: text.into(),
            },
        )
    }

    fn tail_mut(&mut self, stream: StreamKind) -> &mut Vec<u8> {
        match stream {
            StreamKind::Stdout => &mut self.stdout_tail,
            StreamKind::Stderr => &mut self.stderr_tail,
        }
    }

    fn take_seq(&mut self) -> Sequence {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn decode_line(&mut self, stream: StreamKind, raw: &[u8]) -> EventRecord {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw).into_owned();

        let payload = match stream {
            StreamKind::Stdout => decode_structured(line),
            StreamKind::Stderr => EventPayload::RawText {
                origin: LineOrigin::Stderr,
                line,
            },
        };

        if let EventPayload::DecodeError { reason, .. } = &payload {
            warn!("Undecodable event line: {}", reason);
        }

        let seq = self.take_seq();
        EventRecord::new(seq, payload)
    }
}

/// Interpret one stdout line.
pub fn decode_structured(line: String) -> EventPayload {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return raw_stdout(line);
    }

    let object = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(object)) => object,
        _ => return raw_stdout(line),
    };

    let Some(tag) = object.get("event").and_then(Value::as_str) else {
        return raw_stdout(line);
    };

    match interpret(tag, &object) {
        Ok(payload) => payload,
        Err(reason) => EventPayload::DecodeError { line, reason },
    }
}

fn raw_stdout(line: String) -> EventPayload {
    EventPayload::RawText {
        origin: LineOrigin::Stdout,
        line,
    }
}

fn interpret(tag: &str, object: &Map<String, Value>) -> Result<EventPayload, String> {
    match tag {
        "play-start" | "playbook_on_play_start" => Ok(EventPayload::PlayStarted {
            play_id: required_text(object, &["play_id", "play_uuid"], tag)?,
            name: text(object, &["name", "play"]).unwrap_or_default(),
        }),
        "task-start" | "playbook_on_task_start" => Ok(EventPayload::TaskStarted {
            task_id: required_text(object, &["task_id", "task_uuid"], tag)?,
            play_id: text(object, &["play_id", "play_uuid"]),
            name: text(object, &["name", "task"]).unwrap_or_default(),
            action: text(object, &["action", "task_action"]),
        }),
        "task-result" | "runner_on_ok" | "runner_on_failed" | "runner_on_skipped"
        | "runner_on_unreachable" => {
            let detail = field(object, &["res", "result", "detail"])
                .cloned()
                .unwrap_or(Value::Null);
            Ok(EventPayload::TaskResult {
                task_id: required_text(object, &["task_id", "task_uuid"], tag)?,
                host: text(object, &["host", "remote_addr"]).unwrap_or_else(|| "localhost".into()),
                outcome: outcome(tag, object, &detail)?,
                detail,
            })
        }
        "run-stats" | "playbook_on_stats" => Ok(EventPayload::RunStats {
            stats: stats(object),
        }),
        other => Err(format!("unrecognized event tag '{other}'")),
    }
}

fn outcome(tag: &str, object: &Map<String, Value>, detail: &Value) -> Result<TaskOutcome, String> {
    if let Some(status) = text(object, &["status", "outcome"]) {
        return TaskOutcome::from_wire(&status).ok_or_else(|| format!("unknown task status '{status}'"));
    }

    let changed = detail.get("changed").and_then(Value::as_bool).unwrap_or(false);
    Ok(match tag {
        "runner_on_failed" => TaskOutcome::Failed,
        "runner_on_skipped" => TaskOutcome::Skipped,
        "runner_on_unreachable" => TaskOutcome::Unreachable,
        _ if changed => TaskOutcome::Changed,
        _ => TaskOutcome::Ok,
    })
}

fn stats(object: &Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Object(stats)) = field(object, &["stats"]) {
        return stats.clone();
    }
    match object.get("event_data") {
        Some(Value::Object(data)) => data
            .iter()
            .filter(|(key, _)| !STATS_BOOKKEEPING.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => Map::new(),
    }
}

fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    let nested = object.get("event_data").and_then(Value::as_object);
    keys.iter().find_map(|key| {
        nested
            .and_then(|data| data.get(*key))
            .or_else(|| object.get(*key))
            .filter(|value| !value.is_null())
    })
}

fn text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(object, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required_text(object: &Map<String, Value>, keys: &[&str], tag: &str) -> Result<String, String> {
    text(object, keys).ok_or_else(|| format!("'{tag}' event without '{}'", keys[0]))
}
