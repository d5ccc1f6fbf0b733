//! Pull/receive event trace
//!
//! The tracer is an actor that appends one JSON object per line. File traces
//! go to `<dir>/trace-<computation>.jsonl`; tests can trace into memory
//! instead.

use crate::error::ReactiveError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Pull,
    Receive,
}

/// One line of a trace file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub at: DateTime<Utc>,
    pub kind: TraceKind,
    pub subscriber: String,
    pub publisher: String,
    /// Debug rendering of the delivered item; absent on pulls
    pub packet: Option<String>,
}

enum Sink {
    File { path: PathBuf, writer: BufWriter<File> },
    Memory(Arc<Mutex<Vec<TraceEvent>>>),
}

pub struct Tracer {
    sink: Sink,
    recorded: u64,
    failed: bool,
}

impl Tracer {
    /// Trace into a fresh file under `dir`, created if missing.
    pub fn to_file(dir: &Path, computation: Uuid) -> Result<Self, ReactiveError> {
        fs::create_dir_all(dir)?;
        let path = Self::trace_path(dir, computation);
        let writer = BufWriter::new(File::create(&path)?);
        tracing::info!(path = %path.display(), "tracing reactive computation");
        Ok(Self {
            sink: Sink::File { path, writer },
            recorded: 0,
            failed: false,
        })
    }

    pub fn in_memory(events: Arc<Mutex<Vec<TraceEvent>>>) -> Self {
        Self {
            sink: Sink::Memory(events),
            recorded: 0,
            failed: false,
        }
    }

    pub fn trace_path(dir: &Path, computation: Uuid) -> PathBuf {
        dir.join(format!("trace-{computation}.jsonl"))
    }

    pub fn pull(&mut self, subscriber: String, publisher: String) {
        self.record(TraceEvent {
            at: Utc::now(),
            kind: TraceKind::Pull,
            subscriber,
            publisher,
            packet: None,
        });
    }

    pub fn receive(&mut self, publisher: String, subscriber: String, packet: String) {
        self.record(TraceEvent {
            at: Utc::now(),
            kind: TraceKind::Receive,
            subscriber,
            publisher,
            packet: Some(packet),
        });
    }

    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn flush(&mut self) {
        if let Sink::File { path, writer } = &mut self.sink {
            if let Err(e) = writer.flush() {
                tracing::warn!(path = %path.display(), error = %e, "failed to flush trace");
            }
        }
    }

    fn record(&mut self, event: TraceEvent) {
        match &mut self.sink {
            Sink::Memory(events) => events.lock().push(event),
            Sink::File { path, writer } => {
                if self.failed {
                    return;
                }
                let written = serde_json::to_writer(&mut *writer, &event)
                    .map_err(std::io::Error::from)
                    .and_then(|()| writer.write_all(b"\n"));
                if let Err(e) = written {
                    // one warning, then the trace is abandoned
                    tracing::warn!(path = %path.display(), error = %e, "trace write failed");
                    self.failed = true;
                    return;
                }
            }
        }
        self.recorded += 1;
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Parse a trace file back into events.
pub fn read_trace(path: &Path) -> Result<Vec<TraceEvent>, ReactiveError> {
    let text = fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| ReactiveError::Io(format!("{}: {e}", path.display())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_trace_is_json_lines() {
        let dir = TempDir::new().unwrap();
        let computation = Uuid::new_v4();
        let mut tracer = Tracer::to_file(dir.path(), computation).unwrap();
        tracer.pull("p/root#2".into(), "p/map#1".into());
        tracer.receive("p/map#1".into(), "p/root#2".into(), "42".into());
        assert_eq!(tracer.recorded(), 2);
        drop(tracer);

        let path = Tracer::trace_path(dir.path(), computation);
        let raw = fs::read_to_string(&path).unwrap();
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["kind"], "pull");
        assert!(first["packet"].is_null());

        let events = read_trace(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, TraceKind::Receive);
        assert_eq!(events[1].publisher, "p/map#1");
        assert_eq!(events[1].packet.as_deref(), Some("42"));
        assert!(events[0].at <= events[1].at);
    }

    #[test]
    fn creates_missing_trace_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let tracer = Tracer::to_file(&nested, Uuid::new_v4()).unwrap();
        drop(tracer);
        assert!(nested.is_dir());
    }

    #[test]
    fn memory_trace_collects_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut tracer = Tracer::in_memory(events.clone());
        tracer.pull("s".into(), "p".into());
        assert_eq!(events.lock().len(), 1);
        assert_eq!(events.lock()[0].subscriber, "s");
    }
}
