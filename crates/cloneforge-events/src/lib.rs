//! NDJSON event envelope and emitter for a single clone run.
//!
//! Every event carries the same envelope (`event`, `ts`, `seq`, `run_id`,
//! `schema_version`, `tool_version`) plus event-specific fields. Events are
//! appended to an NDJSON sink one line at a time, flushed after every
//! write, so a crash mid-run leaves a readable prefix rather than a
//! truncated JSON value.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// Schema version for the event envelope itself. Bump when a field is
/// added, renamed, or removed in a way a consumer must branch on.
pub const SCHEMA_VERSION: u32 = 1;

/// The closed set of event names a run may emit. Kept as an enum (rather
/// than a bare `&str`) so a typo in a call site is a compile error, not a
/// silent miss in a downstream consumer's `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Estimate,
    PhaseStart,
    PhaseEnd,
    PhaseError,
    RegexWarning,
    PluginLoaded,
    PluginLoadFailed,
    PostAssetStart,
    PostAssetProgress,
    PostAssetEnd,
    PostAssetError,
    PluginFinalizeStart,
    PluginFinalizeEnd,
    PluginFinalizeError,
    DiffSummary,
    Verify,
    Canceled,
    ChecksumsCanceled,
    CleanupRemoved,
    Timings,
    RunContainer,
    ServeFolder,
    Summary,
    SummaryFinal,
}

/// One line of the NDJSON event stream: the envelope plus whatever
/// event-specific payload the caller attached.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event: EventKind,
    pub ts: String,
    pub seq: u64,
    pub run_id: String,
    pub schema_version: u32,
    pub tool_version: String,
    /// Event-specific fields, flattened into the top-level object so
    /// consumers see e.g. `{"event":"phase_start","phase":"mirror",...}`
    /// rather than a nested `fields` object.
    #[serde(flatten)]
    pub fields: Value,
}

/// Emits events for a single run: stamps the envelope, writes one NDJSON
/// line per event, and keeps an in-memory buffer of everything emitted so
/// far (used for `summary`/`summary_final` aggregation and tests).
pub struct EventEmitter {
    run_id: String,
    tool_version: String,
    seq: AtomicU64,
    sink: Option<Mutex<File>>,
    buffer: Mutex<Vec<Event>>,
}

impl EventEmitter {
    /// Build an emitter that only buffers in memory (no file sink). Used
    /// by tests and by callers that forward events some other way.
    pub fn buffered(run_id: impl Into<String>, tool_version: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            tool_version: tool_version.into(),
            seq: AtomicU64::new(0),
            sink: None,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Build an emitter that appends each event as one NDJSON line to
    /// `path`, creating the file if it doesn't exist. Each write is
    /// followed by a flush so the file is always readable up to the last
    /// complete line.
    pub fn to_file(
        run_id: impl Into<String>,
        tool_version: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("opening event sink at {}", path.as_ref().display()))?;
        Ok(Self {
            run_id: run_id.into(),
            tool_version: tool_version.into(),
            seq: AtomicU64::new(0),
            sink: Some(Mutex::new(file)),
            buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emit one event with the given kind and a JSON object of
    /// event-specific fields (pass `serde_json::json!({})` for events
    /// with no extra payload).
    pub fn emit(&self, kind: EventKind, fields: Value) -> Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            event: kind,
            ts: Utc::now().to_rfc3339(),
            seq,
            run_id: self.run_id.clone(),
            schema_version: SCHEMA_VERSION,
            tool_version: self.tool_version.clone(),
            fields,
        };
        if let Some(sink) = &self.sink {
            let line = serde_json::to_string(&event).context("serializing event")?;
            let mut guard = sink.lock().expect("event sink mutex poisoned");
            writeln!(guard, "{line}").context("writing event line")?;
            guard.flush().context("flushing event sink")?;
        }
        self.buffer
            .lock()
            .expect("event buffer mutex poisoned")
            .push(event);
        Ok(())
    }

    /// Snapshot of every event emitted so far, in emission order.
    pub fn events(&self) -> Vec<Event> {
        self.buffer.lock().expect("event buffer mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().expect("event buffer mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
