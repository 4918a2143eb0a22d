//! Per-turn tracing.
//!
//! Each chat turn records a [`TurnTrace`]: timestamped events plus a
//! metadata map, flushed as a single JSONL line to an append-only export
//! file when the turn ends. Components attach metadata through
//! [`update_current_trace`], which is best-effort: outside a turn (batch
//! evaluation, tests) it silently does nothing. Tracing never fails a turn.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static ACTIVE_TURN: Mutex<Option<TurnTrace>> = Mutex::new(None);

/// One timestamped entry in a turn trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
}

/// The trace of a single chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTrace {
    pub turn_id: String,
    pub thread_id: String,
    pub started_at: DateTime<Utc>,
    pub events: Vec<TraceEvent>,
    pub metadata: serde_json::Map<String, Value>,
}

impl TurnTrace {
    fn new(thread_id: &str) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            started_at: Utc::now(),
            events: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Install the active trace for a turn.
///
/// The returned guard flushes the trace exactly once, either via
/// [`TurnGuard::finish`] or on drop.
pub fn start_turn(thread_id: &str, export_path: &Path) -> TurnGuard {
    *ACTIVE_TURN.lock() = Some(TurnTrace::new(thread_id));
    TurnGuard {
        export_path: export_path.to_path_buf(),
        flushed: false,
    }
}

/// Append an event to the active turn trace, if any.
pub fn record_event(event_type: &str, payload: Value) {
    if let Some(trace) = ACTIVE_TURN.lock().as_mut() {
        trace.events.push(TraceEvent {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            payload,
        });
    }
}

/// Attach a metadata value to the active turn trace.
///
/// No-op when no turn is active.
pub fn update_current_trace(key: &str, value: Value) {
    if let Some(trace) = ACTIVE_TURN.lock().as_mut() {
        trace.metadata.insert(key.to_string(), value);
    }
}

/// Flushes the active turn trace when the turn ends.
pub struct TurnGuard {
    export_path: PathBuf,
    flushed: bool,
}

impl TurnGuard {
    /// Flush the trace to the export file.
    pub fn finish(mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        if self.flushed {
            return;
        }
        self.flushed = true;

        let Some(trace) = ACTIVE_TURN.lock().take() else {
            return;
        };

        if let Err(e) = append_trace(&self.export_path, &trace) {
            tracing::warn!("Failed to export turn trace: {e}");
        }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.flush();
    }
}

fn append_trace(path: &Path, trace: &TurnTrace) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(trace)?;
    writeln!(file, "{line}")?;
    Ok(())
}

// Traces share one process-wide slot; tests touching it must serialize.
#[cfg(test)]
pub(crate) static TEST_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn turn_flushes_one_jsonl_line() {
        let _serial = TEST_LOCK.lock();
        let temp = tempdir().unwrap();
        let path = temp.path().join("traces.jsonl");

        let guard = start_turn("thread-1", &path);
        record_event("turn_started", serde_json::json!({"content": "hi"}));
        update_current_trace("user", serde_json::json!("alice"));
        guard.finish();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);

        let trace: TurnTrace = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(trace.thread_id, "thread-1");
        assert_eq!(trace.events.len(), 1);
        assert_eq!(trace.metadata["user"], "alice");
    }

    #[test]
    fn guard_drop_flushes_exactly_once() {
        let _serial = TEST_LOCK.lock();
        let temp = tempdir().unwrap();
        let path = temp.path().join("traces.jsonl");

        {
            let _guard = start_turn("thread-2", &path);
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(ACTIVE_TURN.lock().is_none());
    }

    #[test]
    fn metadata_update_outside_a_turn_is_a_noop() {
        let _serial = TEST_LOCK.lock();
        *ACTIVE_TURN.lock() = None;
        update_current_trace("user", serde_json::json!("alice"));
        assert!(ACTIVE_TURN.lock().is_none());
    }
}
