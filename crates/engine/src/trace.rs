//! Structured per-run tracing and the run session lifecycle.
//!
//! A [`Tracer`] is an explicit value passed into the executor rather than
//! ambient logging: opened once per run, flushed and closed on every exit
//! path including error and cancellation. The JSONL sink writes one event
//! per line; sink failures are logged and never fail the run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// One structured trace event.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub at: DateTime<Utc>,
    #[serde(rename = "event")]
    pub kind: TraceEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl TraceEvent {
    pub fn new(kind: TraceEventKind, state: Option<&str>, details: Value) -> Self {
        Self {
            at: Utc::now(),
            kind,
            state: state.map(String::from),
            details,
        }
    }
}

/// Trace event kinds emitted by the engine.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    RunStart,
    StateStart,
    StateComplete,
    Transition,
    InputRequested,
    RoutingFallback,
    Error,
    RunEnd,
}

/// A trace sink. Implementations must tolerate concurrent records from
/// independent runs only if shared; the engine gives each run its own.
pub trait Tracer: Send + Sync {
    fn record(&self, event: &TraceEvent);
    fn flush(&self) {}
}

/// Discards every event.
pub struct NullTracer;

impl Tracer for NullTracer {
    fn record(&self, _event: &TraceEvent) {}
}

/// Appends events as JSON lines to a file.
pub struct JsonlTracer {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlTracer {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Tracer for JsonlTracer {
    fn record(&self, event: &TraceEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(error) => {
                warn!(%error, "failed to serialize trace event");
                return;
            }
        };
        let mut writer = self.writer.lock().expect("trace writer lock");
        if let Err(error) = writeln!(writer, "{line}") {
            warn!(%error, path = %self.path.display(), "failed to write trace event");
        }
    }

    fn flush(&self) {
        let mut writer = self.writer.lock().expect("trace writer lock");
        if let Err(error) = writer.flush() {
            warn!(%error, path = %self.path.display(), "failed to flush trace log");
        }
    }
}

/// Records events in memory. Useful for tests asserting on the trace.
#[derive(Default)]
pub struct MemoryTracer {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTracer {
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("trace buffer lock").clone()
    }

    /// Kinds of the recorded events, in order.
    pub fn kinds(&self) -> Vec<TraceEventKind> {
        self.events().iter().map(|event| event.kind).collect()
    }
}

impl Tracer for MemoryTracer {
    fn record(&self, event: &TraceEvent) {
        self.events
            .lock()
            .expect("trace buffer lock")
            .push(event.clone());
    }
}

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique run identifier: UTC timestamp plus a per-process
/// counter so runs started within the same second stay distinct.
pub fn next_run_id() -> String {
    let sequence = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:04}", Utc::now().format("%Y%m%d-%H%M%S"), sequence)
}

/// One run's identity and trace sink, closed exactly once on every exit
/// path (success, failure, or cancellation).
pub struct RunSession {
    run_id: String,
    dir: Option<PathBuf>,
    tracer: Arc<dyn Tracer>,
    closed: AtomicBool,
}

impl RunSession {
    pub fn new(run_id: String, dir: Option<PathBuf>, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            run_id,
            dir,
            tracer,
            closed: AtomicBool::new(false),
        }
    }

    /// A session with a generated id and no persistence. Useful for tests
    /// and harness runs that only need the outcome.
    pub fn ephemeral() -> Self {
        Self::new(next_run_id(), None, Arc::new(NullTracer))
    }

    /// A session recording to the given tracer with a generated id.
    pub fn with_tracer(tracer: Arc<dyn Tracer>) -> Self {
        Self::new(next_run_id(), None, tracer)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn record(&self, event: TraceEvent) {
        self.tracer.record(&event);
    }

    /// Flush and close the session. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.tracer.flush();
        }
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_ids_are_unique() {
        let first = next_run_id();
        let second = next_run_id();
        assert_ne!(first, second);
    }

    #[test]
    fn jsonl_tracer_writes_one_line_per_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.jsonl");
        let tracer = JsonlTracer::create(&path).expect("create tracer");
        tracer.record(&TraceEvent::new(TraceEventKind::RunStart, None, json!({"run": 1})));
        tracer.record(&TraceEvent::new(
            TraceEventKind::StateStart,
            Some("ask"),
            Value::Null,
        ));
        tracer.flush();

        let contents = std::fs::read_to_string(&path).expect("read trace");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("run_start"));
        assert!(lines[1].contains("\"state\":\"ask\""));
    }

    #[test]
    fn session_close_is_idempotent() {
        let tracer = Arc::new(MemoryTracer::default());
        let session = RunSession::with_tracer(tracer.clone());
        session.record(TraceEvent::new(TraceEventKind::RunStart, None, Value::Null));
        session.close();
        session.close();
        assert_eq!(tracer.events().len(), 1);
    }
}
