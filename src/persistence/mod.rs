//! The `persistence` module provides the shared, ordered, bounded log that
//! every published message travels through.
//!
//! Writers only ever append. Each record gets a strictly increasing id from
//! the store, and readers tail the log from a remembered id. The bundled
//! backing store is `sled`; anything implementing [`OrderedLog`] can replace
//! it (a replicated commit log, a capped collection on a database server).

pub mod client;
pub mod sled_log;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use client::LogClient;
pub use sled_log::{SledLog, SledLogReader};

pub type Result<T> = std::result::Result<T, LogError>;

/// Identifier assigned by the store on append. Never reused.
pub type LogId = u64;

/// One entry of the ordered log. Immutable once written.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub id: LogId,
    /// Full topic path as published, trailing separator included.
    pub topic: String,
    pub payload: String,
    /// Milliseconds since the UNIX epoch at append time.
    pub timestamp: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode or decode record: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("corrupt record key ({0} bytes)")]
    CorruptKey(usize),
    #[error("log task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("log unavailable: {0}")]
    Unavailable(String),
}

/// A durable, bounded, append-only log with store-assigned increasing ids.
pub trait OrderedLog: Send + Sync {
    /// Durably records the entry and returns its id once the store has
    /// acknowledged the write.
    fn append(&self, topic: &str, payload: &str) -> Result<LogId>;

    /// Highest id currently present, `None` for an empty log.
    fn latest_id(&self) -> Result<Option<LogId>>;

    /// Opens a reader producing records with id strictly greater than `after`
    /// (`None` reads from the oldest retained record), in ascending id order.
    ///
    /// If `after` has already been evicted the reader resumes at the oldest
    /// retained record without reporting the gap.
    fn read_from(&self, after: Option<LogId>) -> Result<Box<dyn LogReader>>;
}

/// Cursor over an [`OrderedLog`]. Not restartable.
pub trait LogReader: Send {
    /// Returns the next record, blocking the calling thread for at most
    /// `wait` when none is available yet (`Ok(None)`).
    fn next_timeout(&mut self, wait: Duration) -> Result<Option<LogRecord>>;
}
