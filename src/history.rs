//! On-screen log history

use std::collections::VecDeque;

use chrono::{DateTime, Local};

use crate::live::{LogEvent, Role};

/// One displayed log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// When the entry was recorded
    pub timestamp: DateTime<Local>,
    /// Attributed role
    pub role: Role,
    /// Displayed text, control codes already stripped
    pub text: String,
}

impl LogEntry {
    /// Stamp an event with the current local time
    #[must_use]
    pub fn now(event: LogEvent) -> Self {
        Self {
            timestamp: Local::now(),
            role: event.role,
            text: event.text,
        }
    }

    /// `HH:MM:SS`
    #[must_use]
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {:>9}: {}", self.time_label(), self.role, self.text)
    }
}

/// Bounded log, newest first
#[derive(Debug)]
pub struct LogHistory {
    entries: VecDeque<LogEntry>,
    limit: usize,
}

impl LogHistory {
    /// Keep at most `limit` entries
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Record an event, evicting the oldest beyond the limit
    pub fn push(&mut self, event: LogEvent) -> &LogEntry {
        self.entries.push_front(LogEntry::now(event));
        self.entries.truncate(self.limit);
        &self.entries[0]
    }

    /// Entries, newest first
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
