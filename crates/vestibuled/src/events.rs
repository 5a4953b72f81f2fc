//! Access log: notification sink that keeps the most recent entries for the
//! D-Bus `RecentEvents` call.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vestibule_core::{AccessEvent, NotificationSink};

/// Entries retained, newest first.
pub const LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Granted {
        timestamp: DateTime<Utc>,
        identity: String,
        similarity: f64,
    },
    /// Routine status, such as start, stop or enrollment.
    Info {
        timestamp: DateTime<Utc>,
        message: String,
    },
    /// Something went wrong.
    Diagnostic {
        timestamp: DateTime<Utc>,
        message: String,
    },
}

#[derive(Debug)]
pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn note(&self, message: &str) {
        tracing::info!("{message}");
        self.push(LogEntry::Info {
            timestamp: Utc::now(),
            message: message.to_string(),
        });
    }

    fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }
}

impl NotificationSink for EventLog {
    fn access_granted(&self, event: &AccessEvent) {
        tracing::info!(
            identity = %event.identity,
            similarity = format_args!("{:.2}", event.similarity),
            "access granted"
        );
        self.push(LogEntry::Granted {
            timestamp: event.timestamp,
            identity: event.identity.clone(),
            similarity: event.similarity,
        });
    }

    fn diagnostic(&self, message: &str) {
        tracing::warn!("{message}");
        self.push(LogEntry::Diagnostic {
            timestamp: Utc::now(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(name: &str) -> AccessEvent {
        AccessEvent {
            timestamp: Utc::now(),
            identity: name.to_string(),
            similarity: 0.91,
        }
    }

    #[test]
    fn test_newest_first_and_bounded() {
        let log = EventLog::with_capacity(3);
        for name in ["a", "b", "c", "d"] {
            log.access_granted(&granted(name));
        }
        let names: Vec<_> = log
            .recent()
            .into_iter()
            .map(|e| match e {
                LogEntry::Granted { identity, .. } => identity,
                LogEntry::Info { message, .. } | LogEntry::Diagnostic { message, .. } => message,
            })
            .collect();
        assert_eq!(names, ["d", "c", "b"]);
    }

    #[test]
    fn test_diagnostics_distinct_from_grants() {
        let log = EventLog::default();
        log.diagnostic("recognition error: registry unavailable");
        log.access_granted(&granted("alice"));
        let json = serde_json::to_value(log.recent()).unwrap();
        assert_eq!(json[0]["kind"], "granted");
        assert_eq!(json[0]["identity"], "alice");
        assert_eq!(json[1]["kind"], "diagnostic");
    }

    #[test]
    fn test_notes_kept_apart_from_faults() {
        let log = EventLog::default();
        log.note("System started.");
        log.diagnostic("Recognition error: engine thread exited");
        let json = serde_json::to_value(log.recent()).unwrap();
        assert_eq!(json[0]["kind"], "diagnostic");
        assert_eq!(json[1]["kind"], "info");
        assert_eq!(json[1]["message"], "System started.");
    }
}
