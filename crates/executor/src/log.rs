//! Bounded activity log.
//!
//! Every lifecycle transition is emitted through `tracing` and also kept as a
//! human-readable line in a fixed-size ring buffer for the admin surface.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::task::TaskKind;

// ── Ring buffer ──────────────────────────────────────────────────────

/// A fixed-size ring buffer backed by `VecDeque`.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an item, evicting the oldest if at capacity.
    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    /// Number of items currently stored.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer holds no items.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum number of items kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

// ── Entries ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        })
    }
}

/// One timestamped activity line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub kind: Option<TaskKind>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self.at.to_rfc3339_opts(SecondsFormat::Millis, true);
        match self.kind {
            Some(kind) => write!(f, "[{}] {} [{}] {}", at, self.level, kind, self.message),
            None => write!(f, "[{}] {} {}", at, self.level, self.message),
        }
    }
}

// ── Activity log ─────────────────────────────────────────────────────

/// Bounded, human-readable record of scheduler activity.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    ring: RingBuffer<LogEntry>,
}

impl ActivityLog {
    /// Create a log keeping the newest `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
        }
    }

    /// Append an entry and mirror it to `tracing`.
    pub fn record(&mut self, level: LogLevel, kind: Option<TaskKind>, message: impl Into<String>) {
        let message = message.into();
        let tag = kind.map(TaskKind::as_str).unwrap_or("-");
        match level {
            LogLevel::Debug => tracing::debug!(kind = tag, "{}", message),
            LogLevel::Info => tracing::info!(kind = tag, "{}", message),
            LogLevel::Warn => tracing::warn!(kind = tag, "{}", message),
            LogLevel::Error => tracing::error!(kind = tag, "{}", message),
        }
        self.ring.push(LogEntry {
            at: Utc::now(),
            level,
            kind,
            message,
        });
    }

    /// Formatted lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.ring.iter().map(ToString::to_string).collect()
    }

    /// Cloned entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.ring.iter().cloned().collect()
    }

    /// Number of entries currently kept.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
