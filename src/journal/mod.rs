//! Journal: structured record of what the core decided and did.
//!
//! `tracing` carries operational log lines; the journal carries the records a
//! host wants to keep or inspect: node events drained at the end of a cycle,
//! cycle metrics, provider and dispatcher failures.
//!
//! ```text
//! CycleController::finalize
//!           │
//!           ▼
//!     Journal::record(entry)
//!           │
//!        ┌──┴──┐
//!        ▼     ▼
//!     Memory  Writer (JSONL)
//! ```

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub level: JournalLevel,
    /// Component that produced the entry (e.g. "node", "backlog", "controller").
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl JournalEntry {
    pub fn new(level: JournalLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.into(),
            cycle_id: None,
            message: message.into(),
            payload: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_cycle(mut self, cycle_id: impl Into<String>) -> Self {
        self.cycle_id = Some(cycle_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Output target for journal entries. Must not block for long.
pub trait JournalSink: Send + Sync {
    fn write(&self, entry: &JournalEntry);

    fn flush(&self) {}
}

pub struct Journal {
    sinks: Vec<Arc<dyn JournalSink>>,
    min_level: JournalLevel,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            min_level: JournalLevel::Trace,
        }
    }

    pub fn with_level(mut self, level: JournalLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn JournalSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn JournalSink>) {
        self.sinks.push(sink);
    }

    /// Whether an entry at `level` would reach any sink. Lets callers skip
    /// building expensive payloads.
    pub fn enabled(&self, level: JournalLevel) -> bool {
        !self.sinks.is_empty() && level >= self.min_level
    }

    pub fn record(&self, entry: &JournalEntry) {
        if !self.enabled(entry.level) {
            return;
        }
        for sink in &self.sinks {
            sink.write(entry);
        }
    }

    pub fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Built-in Sinks ────────────────────────────────────────────────────────

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps entries in memory for inspection.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        lock(&self.entries).clone()
    }

    /// Entries whose source matches exactly.
    pub fn from_source(&self, source: &str) -> Vec<JournalEntry> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.source == source)
            .cloned()
            .collect()
    }

    pub fn for_cycle(&self, cycle_id: &str) -> Vec<JournalEntry> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.cycle_id.as_deref() == Some(cycle_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl JournalSink for MemorySink {
    fn write(&self, entry: &JournalEntry) {
        lock(&self.entries).push(entry.clone());
    }
}

/// Writes one JSON object per line to any `Write` target (file, stderr, buffer).
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> JournalSink for WriterSink<W> {
    fn write(&self, entry: &JournalEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "journal entry not serializable");
                return;
            }
        };
        if let Err(e) = writeln!(lock(&self.writer), "{line}") {
            tracing::warn!(error = %e, "journal write failed");
        }
    }

    fn flush(&self) {
        if let Err(e) = lock(&self.writer).flush() {
            tracing::warn!(error = %e, "journal flush failed");
        }
    }
}
