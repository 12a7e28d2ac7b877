//! Structured log channel shared between a run and the presentation layer.
//!
//! Each run owns one [`LogChannel`]: a bounded, thread-safe history of
//! [`LogRecord`]s. The engine and the experiment's lifecycle code write
//! through cheap [`RunLogger`] handles (which also mirror every record to
//! `tracing`, so console output keeps working); the presentation layer polls
//! the history with a [`LogFilter`].
//!
//! Reads are non-destructive: records below the active filter floor stay in
//! the history, so the user can loosen the filter after the fact and still
//! see earlier records, up to the retention cap. When the history is full the
//! oldest record is evicted; the first eviction emits a single warning record
//! so the loss is visible without flooding the channel.

use anyhow::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Severity of a log record, ordered `Debug < Info < Warning < Error <
/// Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    /// Diagnostic detail.
    Debug,
    /// Routine progress.
    Info,
    /// Something unexpected but recoverable.
    Warning,
    /// A failure.
    Error,
    /// A failure that ends the run.
    Critical,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        };
        write!(f, "{name}")
    }
}

/// Which logger produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    /// The engine's own logger (phase transitions, failures, overflow).
    Framework,
    /// The user experiment's logger.
    Experiment,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::Framework => write!(f, "framework"),
            LogSource::Experiment => write!(f, "experiment"),
        }
    }
}

/// One immutable log record.
///
/// `seq` increases monotonically per channel; pollers can remember the last
/// sequence number they saw and ask only for newer records.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Channel-wide sequence number, starting at 0.
    pub seq: u64,
    /// Wall-clock creation time.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: Level,
    /// Producing logger.
    pub source: LogSource,
    /// Message body. For records created from an error, the rendered error
    /// chain (and backtrace, when captured) trails the message.
    pub message: String,
}

/// Level floor and source restriction applied when polling.
#[derive(Debug, Clone, Copy)]
pub struct LogFilter {
    /// Lowest level to include.
    pub min_level: Level,
    /// Restrict to one source, or `None` for both.
    pub source: Option<LogSource>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            min_level: Level::Debug,
            source: None,
        }
    }
}

impl LogFilter {
    /// Filter that passes every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter with the given level floor and no source restriction.
    pub fn at_least(min_level: Level) -> Self {
        Self {
            min_level,
            source: None,
        }
    }

    /// Restrict the filter to one source.
    pub fn from_source(mut self, source: LogSource) -> Self {
        self.source = Some(source);
        self
    }

    fn matches(&self, record: &LogRecord) -> bool {
        record.level >= self.min_level && self.source.map_or(true, |s| s == record.source)
    }
}

struct ChannelState {
    records: VecDeque<LogRecord>,
    next_seq: u64,
    dropped: u64,
    overflow_warned: bool,
}

/// Bounded, thread-safe log history for one run.
pub struct LogChannel {
    capacity: usize,
    state: Mutex<ChannelState>,
}

impl LogChannel {
    /// Create a channel retaining at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            state: Mutex::new(ChannelState {
                records: VecDeque::with_capacity(capacity.max(2)),
                next_seq: 0,
                dropped: 0,
                overflow_warned: false,
            }),
        }
    }

    /// Append a record and mirror it to `tracing`.
    pub fn emit(&self, level: Level, source: LogSource, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::Debug => tracing::debug!(source = %source, "{message}"),
            Level::Info => tracing::info!(source = %source, "{message}"),
            Level::Warning => tracing::warn!(source = %source, "{message}"),
            Level::Error | Level::Critical => tracing::error!(source = %source, "{message}"),
        }
        self.push(level, source, message);
    }

    /// Append a record whose message body ends with the rendered error chain.
    pub fn emit_with_trace(
        &self,
        level: Level,
        source: LogSource,
        message: impl Into<String>,
        error: &Error,
    ) {
        let message = format!("{}\n{error:?}", message.into());
        self.emit(level, source, message);
    }

    fn push(&self, level: Level, source: LogSource, message: String) {
        #[allow(clippy::unwrap_used)] // lock poisoning only on panic while logging
        let mut state = self.state.lock().unwrap();

        if state.records.len() >= self.capacity {
            state.records.pop_front();
            state.dropped += 1;
            if !state.overflow_warned {
                state.overflow_warned = true;
                let seq = state.next_seq;
                state.next_seq += 1;
                state.records.push_back(LogRecord {
                    seq,
                    timestamp: Utc::now(),
                    level: Level::Warning,
                    source: LogSource::Framework,
                    message: "log history reached capacity; oldest records are being dropped"
                        .to_string(),
                });
                if state.records.len() >= self.capacity {
                    state.records.pop_front();
                    state.dropped += 1;
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.records.push_back(LogRecord {
            seq,
            timestamp: Utc::now(),
            level,
            source,
            message,
        });
    }

    /// Retained records passing `filter`, in emission order. Non-destructive.
    pub fn history(&self, filter: &LogFilter) -> Vec<LogRecord> {
        #[allow(clippy::unwrap_used)]
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// Retained records with `seq > after` passing `filter`.
    pub fn since(&self, after: u64, filter: &LogFilter) -> Vec<LogRecord> {
        #[allow(clippy::unwrap_used)]
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .filter(|r| r.seq > after && filter.matches(r))
            .cloned()
            .collect()
    }

    /// Number of retained records (unfiltered).
    pub fn len(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let state = self.state.lock().unwrap();
        state.records.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records evicted so far.
    pub fn dropped(&self) -> u64 {
        #[allow(clippy::unwrap_used)]
        let state = self.state.lock().unwrap();
        state.dropped
    }
}

/// Cheap cloneable producer handle bound to one channel and one source.
#[derive(Clone)]
pub struct RunLogger {
    channel: Arc<LogChannel>,
    source: LogSource,
}

impl RunLogger {
    /// Create a logger writing to `channel` as `source`.
    pub fn new(channel: Arc<LogChannel>, source: LogSource) -> Self {
        Self { channel, source }
    }

    /// Emit a `Debug` record.
    pub fn debug(&self, message: impl Into<String>) {
        self.channel.emit(Level::Debug, self.source, message);
    }

    /// Emit an `Info` record.
    pub fn info(&self, message: impl Into<String>) {
        self.channel.emit(Level::Info, self.source, message);
    }

    /// Emit a `Warning` record.
    pub fn warning(&self, message: impl Into<String>) {
        self.channel.emit(Level::Warning, self.source, message);
    }

    /// Emit an `Error` record.
    pub fn error(&self, message: impl Into<String>) {
        self.channel.emit(Level::Error, self.source, message);
    }

    /// Emit a `Critical` record.
    pub fn critical(&self, message: impl Into<String>) {
        self.channel.emit(Level::Critical, self.source, message);
    }

    /// Emit an `Error` record carrying the rendered error chain.
    pub fn error_with(&self, message: impl Into<String>, error: &Error) {
        self.channel
            .emit_with_trace(Level::Error, self.source, message, error);
    }
}
