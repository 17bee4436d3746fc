//! Test doubles for hosts embedding the engine

use crate::log::LogSink;
use parking_lot::Mutex;
use runhost_core::Severity;

/// Sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records
    pub fn records(&self) -> Vec<(Severity, String)> {
        self.records.lock().clone()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no records were emitted
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop all records
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Severity, message: &str) {
        self.records.lock().push((level, message.to_string()));
    }
}
