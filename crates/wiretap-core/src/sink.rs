//! Log sinks.
//!
//! A [`LogSink`] receives every event the interceptor produces. Sinks are
//! only ever called from the background writer task, never on the request
//! path, so a slow or failing sink cannot delay or alter a response.

use crate::aggregator::StatusSummary;
use crate::error::{SinkError, SinkResult};
use crate::record::{LatencyAlert, LogRecord, Severity};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Event handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Record(LogRecord),
    Alert(LatencyAlert),
    Summary(StatusSummary),
}

impl SinkEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SinkEvent::Record(r) => r.event_type,
            SinkEvent::Alert(a) => a.event_type,
            SinkEvent::Summary(s) => s.event_type,
        }
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            SinkEvent::Record(r) => serde_json::to_string(r),
            SinkEvent::Alert(a) => serde_json::to_string(a),
            SinkEvent::Summary(s) => serde_json::to_string(s),
        }
    }
}

/// Destination for interceptor events.
///
/// Implement this trait to ship records somewhere other than `tracing`.
pub trait LogSink: Send + Sync + 'static {
    /// Write one request/response record.
    fn write(&self, record: &LogRecord) -> SinkResult;

    /// Write a latency alert.
    fn write_alert(&self, alert: &LatencyAlert) -> SinkResult;

    /// Write a status summary.
    fn write_summary(&self, summary: &StatusSummary) -> SinkResult;

    /// Flush any buffered data. Called when the interceptor shuts down.
    fn flush(&self) -> SinkResult {
        Ok(())
    }

    /// Dispatch an event to the matching write method.
    fn write_event(&self, event: &SinkEvent) -> SinkResult {
        match event {
            SinkEvent::Record(record) => self.write(record),
            SinkEvent::Alert(alert) => self.write_alert(alert),
            SinkEvent::Summary(summary) => self.write_summary(summary),
        }
    }
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn write(&self, record: &LogRecord) -> SinkResult {
        (**self).write(record)
    }

    fn write_alert(&self, alert: &LatencyAlert) -> SinkResult {
        (**self).write_alert(alert)
    }

    fn write_summary(&self, summary: &StatusSummary) -> SinkResult {
        (**self).write_summary(summary)
    }

    fn flush(&self) -> SinkResult {
        (**self).flush()
    }

    fn write_event(&self, event: &SinkEvent) -> SinkResult {
        (**self).write_event(event)
    }
}

/// Emits every event as one JSON line through `tracing`.
///
/// Records are logged at their severity, alerts at `WARN` and summaries at
/// `INFO`, all under the `wiretap::http` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, record: &LogRecord) -> SinkResult {
        let line = serde_json::to_string(record)?;
        match record.severity {
            Severity::Error => tracing::error!(target: "wiretap::http", "{}", line),
            Severity::Warn => tracing::warn!(target: "wiretap::http", "{}", line),
            Severity::Info => tracing::info!(target: "wiretap::http", "{}", line),
        }
        Ok(())
    }

    fn write_alert(&self, alert: &LatencyAlert) -> SinkResult {
        let line = serde_json::to_string(alert)?;
        tracing::warn!(target: "wiretap::http", "{}", line);
        Ok(())
    }

    fn write_summary(&self, summary: &StatusSummary) -> SinkResult {
        let line = serde_json::to_string(summary)?;
        tracing::info!(target: "wiretap::http", "{}", line);
        Ok(())
    }
}

/// Appends every event as a JSON object on its own line.
///
/// ```ignore
/// use wiretap_core::JsonLinesSink;
///
/// let sink = JsonLinesSink::new("./http.jsonl")?;
/// ```
#[derive(Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl JsonLinesSink {
    /// Create or append to the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> SinkResult<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &SinkEvent) -> SinkResult {
        let json = event.to_json()?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        writeln!(writer, "{}", json)?;
        Ok(())
    }
}

impl LogSink for JsonLinesSink {
    fn write(&self, record: &LogRecord) -> SinkResult {
        self.append(&SinkEvent::Record(record.clone()))
    }

    fn write_alert(&self, alert: &LatencyAlert) -> SinkResult {
        self.append(&SinkEvent::Alert(alert.clone()))
    }

    fn write_summary(&self, summary: &StatusSummary) -> SinkResult {
        self.append(&SinkEvent::Summary(summary.clone()))
    }

    fn flush(&self) -> SinkResult {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    fn write_event(&self, event: &SinkEvent) -> SinkResult {
        self.append(event)
    }
}

/// Keeps every event in memory.
///
/// Clones share the same storage. Switch it into failing mode with
/// [`set_failing`](Self::set_failing) to reject writes.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().clone()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Record(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<LatencyAlert> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Alert(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<StatusSummary> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Summary(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn store(&self, event: SinkEvent) -> SinkResult {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink is failing".to_string()));
        }
        self.lock().push(event);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: &LogRecord) -> SinkResult {
        self.store(SinkEvent::Record(record.clone()))
    }

    fn write_alert(&self, alert: &LatencyAlert) -> SinkResult {
        self.store(SinkEvent::Alert(alert.clone()))
    }

    fn write_summary(&self, summary: &StatusSummary) -> SinkResult {
        self.store(SinkEvent::Summary(summary.clone()))
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _record: &LogRecord) -> SinkResult {
        Ok(())
    }

    fn write_alert(&self, _alert: &LatencyAlert) -> SinkResult {
        Ok(())
    }

    fn write_summary(&self, _summary: &StatusSummary) -> SinkResult {
        Ok(())
    }
}
