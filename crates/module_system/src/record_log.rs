//! # Outbound Log Records
//!
//! The host's outbound logging collaborator accepts leveled, size-bounded
//! text records with an event identifier. The core does not define a wire
//! format; it only guarantees that a record never exceeds [`MAX_RECORD_LEN`]
//! characters, splitting long messages into multiple records with
//! "part i of n" headers. The default sink forwards to `tracing`.

use std::fmt;

/// Maximum characters per emitted record, headers included for split parts.
pub const MAX_RECORD_LEN: usize = 2000;

/// Log levels, matching standard tracing conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

/// Sink for size-bounded records. Implementations must accept records up to
/// [`MAX_RECORD_LEN`] characters.
pub trait RecordSink: Send + Sync {
    fn write(&self, level: LogLevel, event_id: u32, text: &str);
}

/// Default sink backed by the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn write(&self, level: LogLevel, event_id: u32, text: &str) {
        match level {
            LogLevel::Error => tracing::error!(event_id, "{}", text),
            LogLevel::Warn => tracing::warn!(event_id, "{}", text),
            LogLevel::Info => tracing::info!(event_id, "{}", text),
            LogLevel::Debug => tracing::debug!(event_id, "{}", text),
            LogLevel::Trace => tracing::trace!(event_id, "{}", text),
        }
    }
}

/// Emits a message through the sink, splitting it into "part i of n" records
/// when it exceeds the record bound.
pub fn emit(sink: &dyn RecordSink, level: LogLevel, event_id: u32, message: &str) {
    if message.chars().count() <= MAX_RECORD_LEN {
        sink.write(level, event_id, message);
        return;
    }

    // Reserve room for the largest possible header so every emitted record,
    // header included, stays within the bound.
    let chunks = split_chars(message, MAX_RECORD_LEN - 32);
    let total = chunks.len();
    for (index, chunk) in chunks.into_iter().enumerate() {
        let record = format!("part {} of {}: {}", index + 1, total, chunk);
        sink.write(level, event_id, &record);
    }
}

/// Splits on character boundaries, never inside a code point.
fn split_chars(text: &str, chunk_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_len {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
