//! Execution log: human-readable progress narration attached to an execution.
//!
//! [LogEntry] is one timestamped line. [ExecutionLogger] is the cloneable handle handed
//! to running actions; the runtime copies its entries back onto the execution record
//! every time it persists.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One narration line.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Append-only, thread-safe log shared between the runtime and the running action.
#[derive(Clone, Debug, Default)]
pub struct ExecutionLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl ExecutionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the entries already recorded on the execution.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Warn, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Error, message));
    }

    /// Entries in timestamp order.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        let mut entries = self.lock().clone();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    fn push(&self, entry: LogEntry) {
        self.lock().push(entry);
    }

    // A poisoned log is still a valid list of lines.
    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_log() {
        let logger = ExecutionLogger::from_entries(vec![LogEntry::new(LogLevel::Info, "created")]);
        let handle = logger.clone();
        handle.info("running");
        handle.error("boom");
        let entries = logger.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "created");
        assert_eq!(entries[2].level, LogLevel::Error);
    }

    #[test]
    fn snapshot_is_sorted_by_timestamp() {
        let early = LogEntry {
            timestamp: Utc::now() - chrono::Duration::seconds(10),
            level: LogLevel::Warn,
            message: "early".into(),
        };
        let logger = ExecutionLogger::new();
        logger.info("late");
        logger.push(early);
        let entries = logger.snapshot();
        assert_eq!(entries[0].message, "early");
        assert_eq!(entries[1].message, "late");
    }
}
