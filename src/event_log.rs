//! Append-only session activity log. Shown to the user and attached to
//! threat alerts. Survives deactivation for the life of the process.

use std::fmt;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

#[derive(Default)]
pub struct EventLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry. Each append is atomic; concurrent writers interleave
    /// in the order their appends land.
    pub fn append(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(message = %message, "event_log");
        self.entries.lock().push(LogEntry {
            timestamp: Local::now(),
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of every entry at this instant.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Rendered `HH:MM:SS: message` lines, as attached to alerts.
    pub fn rendered(&self) -> Vec<String> {
        self.entries.lock().iter().map(ToString::to_string).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.message.clone()).collect()
    }
}
