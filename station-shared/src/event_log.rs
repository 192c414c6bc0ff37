//! Operator-facing rolling event log.
//!
//! Each subsystem keeps a short, capped log ordered most-recent-first. Once
//! full, pushing a new entry drops the oldest one.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Part of the station an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Sensor,
    Stream,
    Detection,
    Actuation,
    Bins,
    System,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Sensor => "sensor",
            Subsystem::Stream => "stream",
            Subsystem::Detection => "detection",
            Subsystem::Actuation => "actuation",
            Subsystem::Bins => "bins",
            Subsystem::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
    pub level: LogLevel,
    pub subsystem: Subsystem,
    pub message: String,
}

impl LogEntry {
    pub fn now(subsystem: Subsystem, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            level,
            subsystem,
            message: message.into(),
        }
    }
}

/// Capped log, newest entry first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl EventLog {
    /// # Panics
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "EventLog capacity must be > 0");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(50)
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a LogEntry;
    type IntoIter = std::collections::vec_deque::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry::now(Subsystem::System, LogLevel::Info, message)
    }

    #[test]
    fn test_newest_first() {
        let mut log = EventLog::new(3);
        log.push(entry("a"));
        log.push(entry("b"));

        let messages: Vec<_> = log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["b", "a"]);
        assert_eq!(log.latest().unwrap().message, "b");
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut log = EventLog::new(3);
        for m in ["1", "2", "3", "4"] {
            log.push(entry(m));
        }
        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_clear() {
        let mut log = EventLog::default();
        assert_eq!(log.capacity(), 50);
        log.push(entry("x"));
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _log = EventLog::new(0);
    }
}
