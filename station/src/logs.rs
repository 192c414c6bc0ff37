//! Per-subsystem operator logs, mirrored to `tracing`.

use serde::Serialize;
use station_shared::{EventLog, LogEntry, LogLevel, Subsystem};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationLogs {
    pub sensor: EventLog,
    pub stream: EventLog,
    pub detection: EventLog,
    pub actuation: EventLog,
    pub bins: EventLog,
    pub system: EventLog,
}

impl StationLogs {
    pub fn new(capacity: usize) -> Self {
        Self {
            sensor: EventLog::new(capacity),
            stream: EventLog::new(capacity),
            detection: EventLog::new(capacity),
            actuation: EventLog::new(capacity),
            bins: EventLog::new(capacity),
            system: EventLog::new(capacity),
        }
    }

    pub fn get(&self, subsystem: Subsystem) -> &EventLog {
        match subsystem {
            Subsystem::Sensor => &self.sensor,
            Subsystem::Stream => &self.stream,
            Subsystem::Detection => &self.detection,
            Subsystem::Actuation => &self.actuation,
            Subsystem::Bins => &self.bins,
            Subsystem::System => &self.system,
        }
    }

    fn get_mut(&mut self, subsystem: Subsystem) -> &mut EventLog {
        match subsystem {
            Subsystem::Sensor => &mut self.sensor,
            Subsystem::Stream => &mut self.stream,
            Subsystem::Detection => &mut self.detection,
            Subsystem::Actuation => &mut self.actuation,
            Subsystem::Bins => &mut self.bins,
            Subsystem::System => &mut self.system,
        }
    }

    pub fn push(&mut self, subsystem: Subsystem, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::now(subsystem, level, message);
        let target = subsystem.as_str();
        match level {
            LogLevel::Debug => debug!(subsystem = target, "{}", entry.message),
            LogLevel::Info => info!(subsystem = target, "{}", entry.message),
            LogLevel::Warn => warn!(subsystem = target, "{}", entry.message),
            LogLevel::Error => error!(subsystem = target, "{}", entry.message),
        }
        self.get_mut(subsystem).push(entry);
    }

    pub fn info(&mut self, subsystem: Subsystem, message: impl Into<String>) {
        self.push(subsystem, LogLevel::Info, message);
    }

    pub fn warn(&mut self, subsystem: Subsystem, message: impl Into<String>) {
        self.push(subsystem, LogLevel::Warn, message);
    }

    pub fn error(&mut self, subsystem: Subsystem, message: impl Into<String>) {
        self.push(subsystem, LogLevel::Error, message);
    }
}

impl Default for StationLogs {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_routed_by_subsystem() {
        let mut logs = StationLogs::new(5);
        logs.info(Subsystem::Bins, "Bin 1 is full");
        logs.warn(Subsystem::Sensor, "Sensor poll failed");

        assert_eq!(logs.get(Subsystem::Bins).len(), 1);
        assert_eq!(logs.get(Subsystem::Sensor).latest().unwrap().level, LogLevel::Warn);
        assert!(logs.get(Subsystem::Stream).is_empty());
    }

    #[test]
    fn test_each_log_is_capped() {
        let mut logs = StationLogs::new(3);
        for i in 0..10 {
            logs.info(Subsystem::Detection, format!("detection {i}"));
        }
        let log = logs.get(Subsystem::Detection);
        assert_eq!(log.len(), 3);
        assert_eq!(log.latest().unwrap().message, "detection 9");
    }
}
