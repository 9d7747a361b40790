// crates/review-harness-core/src/log.rs
// ============================================================================
// Module: Harness Logging
// Description: Structured JSON-lines log events and sinks.
// Purpose: Record run, check, monitor, and deploy events without globals.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Log events are serialized one per line with `serde_json`. Sinks implement
//! [`HarnessLog`] and are built once by the binary, then shared as
//! `Arc<dyn HarnessLog>`. Write failures are ignored; logging never fails a
//! check.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure.
    Error,
}

/// One structured log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Additional structured fields.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event: &'static str, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            event,
            timestamp_ms: now_ms(),
            level,
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Adds a structured field.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Milliseconds since the Unix epoch, or zero when the clock is before it.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_millis())
}

// ============================================================================
// SECTION: Sink Trait
// ============================================================================

/// Log sink shared by every harness component.
pub trait HarnessLog: Send + Sync {
    /// Records one event.
    fn record(&self, event: &LogEvent);

    /// Flushes buffered output.
    fn flush(&self) {}

    /// Records an info event.
    fn info(&self, event: &'static str, message: &str) {
        self.record(&LogEvent::new(event, LogLevel::Info, message));
    }

    /// Records a warning event.
    fn warn(&self, event: &'static str, message: &str) {
        self.record(&LogEvent::new(event, LogLevel::Warn, message));
    }

    /// Records an error event.
    fn error(&self, event: &'static str, message: &str) {
        self.record(&LogEvent::new(event, LogLevel::Error, message));
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Sink that writes JSON lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrLogSink;

impl HarnessLog for StderrLogSink {
    fn record(&self, event: &LogEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Sink that appends JSON lines to a file.
pub struct FileLogSink {
    /// File handle used for append-only logging.
    file: Mutex<File>,
    /// Path of the log file.
    path: PathBuf,
}

impl FileLogSink {
    /// Opens the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Creates `<dir>/<prefix>_<millis>.jsonl`, keeping at most `keep` log
    /// files with that prefix (the new one included).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn timestamped(dir: &Path, prefix: &str, keep: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{prefix}_{}.jsonl", now_ms()));
        let sink = Self::new(&path)?;
        prune_logs(dir, prefix, keep.max(1))?;
        Ok(sink)
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Removes the oldest `<prefix>_*.jsonl` files beyond `keep`.
fn prune_logs(dir: &Path, prefix: &str, keep: usize) -> io::Result<()> {
    let head = format!("{prefix}_");
    let mut logs: Vec<(u128, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if let Some(stamp) = name.strip_prefix(&head).and_then(|rest| rest.strip_suffix(".jsonl"))
            && let Ok(stamp) = stamp.parse::<u128>()
        {
            logs.push((stamp, path));
        }
    }
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for (_, path) in logs.into_iter().take(excess) {
        fs::remove_file(path)?;
    }
    Ok(())
}

impl HarnessLog for FileLogSink {
    fn record(&self, event: &LogEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Sink that forwards every event to several sinks.
#[derive(Default)]
pub struct FanoutLogSink {
    /// Downstream sinks in registration order.
    sinks: Vec<Arc<dyn HarnessLog>>,
}

impl FanoutLogSink {
    /// Creates a fan-out over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn HarnessLog>>) -> Self {
        Self {
            sinks,
        }
    }
}

impl HarnessLog for FanoutLogSink {
    fn record(&self, event: &LogEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

/// No-op sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl HarnessLog for NoopLogSink {
    fn record(&self, _event: &LogEvent) {}
}
