//! Bounded activity log for operator visibility.
//!
//! Keeps the 100 most recent entries, newest first, and persists the
//! whole list as one JSON document on every change. Older entries are
//! silently evicted. The platform request model is one writer per
//! request, so a plain mutex around the list is all the coordination
//! needed.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Maximum number of retained entries.
pub const LOG_CAPACITY: usize = 100;

/// Severity of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// One recorded step of webhook handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, Value>,
}

/// Shared handle to the bounded activity log.
#[derive(Clone)]
pub struct ActivityLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    path: Option<PathBuf>,
}

impl ActivityLog {
    /// Open the activity log, loading persisted entries if a path is
    /// configured and the file exists.
    pub fn open(path: Option<PathBuf>) -> Self {
        let mut entries = VecDeque::new();

        if let Some(p) = &path {
            match fs::read(p) {
                Ok(bytes) => match serde_json::from_slice::<Vec<LogEntry>>(&bytes) {
                    Ok(loaded) => {
                        entries = loaded.into_iter().take(LOG_CAPACITY).collect();
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "activity_log_parse_failed");
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "activity_log_read_failed");
                }
            }
        }

        Self {
            entries: Arc::new(Mutex::new(entries)),
            path,
        }
    }

    /// Append an info entry.
    pub fn info(&self, message: impl Into<String>, data: Value) {
        self.append(LogLevel::Info, message, data);
    }

    /// Append an error entry.
    pub fn error(&self, message: impl Into<String>, data: Value) {
        self.append(LogLevel::Error, message, data);
    }

    /// Append an entry, evicting the oldest once over capacity.
    pub fn append(&self, level: LogLevel, message: impl Into<String>, data: Value) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data: match data {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".to_string(), other);
                    map
                }
            },
        };

        let snapshot = {
            let mut entries = self.entries.lock().expect("activity log lock poisoned");
            entries.push_front(entry);
            entries.truncate(LOG_CAPACITY);
            self.path.as_ref().map(|_| entries.iter().cloned().collect::<Vec<_>>())
        };

        if let Some(snapshot) = snapshot {
            self.persist(&snapshot);
        }
    }

    /// Read up to `limit` entries, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().expect("activity log lock poisoned");
        entries.iter().take(limit).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("activity log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries, returning how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut entries = self.entries.lock().expect("activity log lock poisoned");
            let removed = entries.len();
            entries.clear();
            removed
        };

        if self.path.is_some() {
            self.persist(&[]);
        }
        removed
    }

    /// Write the full entry list to disk. Persistence failures are
    /// logged and swallowed: recording activity must never fail the
    /// request being recorded.
    fn persist(&self, entries: &[LogEntry]) {
        let Some(path) = &self.path else { return };

        let result = serde_json::to_vec_pretty(entries)
            .map_err(std::io::Error::other)
            .and_then(|bytes| fs::write(path, bytes));

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "activity_log_persist_failed");
        }
    }
}
