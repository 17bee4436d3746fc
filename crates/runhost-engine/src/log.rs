//! Diagnostic capture and emission
//!
//! Each execution context owns one [`LogAggregator`]. Diagnostics are
//! appended to its buffer in emission order and its worst-severity marker
//! only ever rises during a run. In [`LogMode::Direct`] every event is also
//! forwarded to the sink immediately; in [`LogMode::Bulk`] the whole buffer
//! goes out as one record when the run is flushed.

use crate::engine::Diagnostic;
use runhost_core::{LogMode, Severity};
use std::fmt;
use std::sync::Arc;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Receiver of leveled log records
pub trait LogSink: Send + Sync {
    /// Emit one record
    fn log(&self, level: Severity, message: &str);
}

/// Sink forwarding records to `tracing`
#[derive(Debug, Clone)]
pub struct TracingSink {
    source: String,
}

impl TracingSink {
    /// Create a sink tagging records with `source`
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn log(&self, level: Severity, message: &str) {
        let source = self.source.as_str();
        match level {
            Severity::Trace => tracing::trace!(source, "{message}"),
            Severity::Debug => tracing::debug!(source, "{message}"),
            Severity::Information => tracing::info!(source, "{message}"),
            Severity::Warning => tracing::warn!(source, "{message}"),
            Severity::Error => tracing::error!(source, "{message}"),
        }
    }
}

/// Per-context diagnostic buffer
pub struct LogAggregator {
    mode: LogMode,
    separator: String,
    buffer: String,
    max_severity: Severity,
    events: usize,
    sink: Arc<dyn LogSink>,
}

impl LogAggregator {
    /// Create an empty aggregator
    pub fn new(mode: LogMode, separator: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            mode,
            separator: separator.into(),
            buffer: String::new(),
            max_severity: Severity::Trace,
            events: 0,
            sink,
        }
    }

    /// Reset the buffer and worst-severity marker for a new run
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.max_severity = Severity::Trace;
        self.events = 0;
    }

    /// Capture one diagnostic
    pub fn record(&mut self, diagnostic: &Diagnostic) {
        let severity = diagnostic.severity();

        if self.mode == LogMode::Direct {
            self.sink.log(severity, &diagnostic.message);
        }

        let line = self.format_line(diagnostic);
        self.buffer.push_str(&line);
        self.max_severity = self.max_severity.max(severity);
        self.events += 1;
    }

    /// End-of-run emission
    ///
    /// Bulk mode emits the whole buffer as one record at the worst severity
    /// seen; direct mode has already forwarded everything.
    pub fn flush(&mut self) {
        if self.mode == LogMode::Bulk {
            self.sink.log(self.max_severity, self.buffer.trim());
        }
    }

    /// Structured line: quoted timestamp, severity and message joined by the separator
    pub fn format_line(&self, diagnostic: &Diagnostic) -> String {
        let timestamp = diagnostic.timestamp.format(TIMESTAMP_FORMAT).to_string();
        let fields = [
            quote(&timestamp),
            quote(diagnostic.severity().as_str()),
            quote(&diagnostic.message),
        ];

        let mut line = fields.join(&self.separator);
        if diagnostic.severity() == Severity::Error {
            if let Some(position) = &diagnostic.position {
                line.push('\n');
                line.push_str(position);
            }
        }
        line.push('\n');
        line
    }

    /// Buffered text of the current (or last) run
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Worst severity seen in the current (or last) run
    pub fn max_severity(&self) -> Severity {
        self.max_severity
    }

    /// Number of diagnostics captured in the current (or last) run
    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Emission policy
    pub fn mode(&self) -> LogMode {
        self.mode
    }

    /// Change the emission policy
    pub fn set_mode(&mut self, mode: LogMode) {
        self.mode = mode;
    }

    /// Field separator
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Change the field separator
    pub fn set_separator(&mut self, separator: impl Into<String>) {
        self.separator = separator.into();
    }
}

impl fmt::Debug for LogAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogAggregator")
            .field("mode", &self.mode)
            .field("separator", &self.separator)
            .field("events", &self.events)
            .field("max_severity", &self.max_severity)
            .finish()
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
