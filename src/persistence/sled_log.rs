//! Capped ordered log backed by `sled`
//!
//! Records live in a single `records` tree keyed by the big-endian id, so
//! key order is id order. Ids come from `Db::generate_id`, which is monotonic
//! across restarts, so an id is never handed out twice even after the
//! records holding it have been evicted.
//!
//! Retention is a record count: once more than `capacity` records are
//! stored, the oldest are popped on the append that overflowed. The newest
//! evicted id is kept in a `meta` tree so readers can tell a real retention
//! gap from the id jump `generate_id` makes after a restart.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Db, IVec, Tree};
use tracing::{debug, error, warn};

use super::{LogError, LogId, LogReader, LogRecord, OrderedLog, Result};

const RECORDS_TREE: &str = "records";
const META_TREE: &str = "meta";
const EVICTED_THROUGH: &[u8] = b"evicted_through";
const READ_BATCH: usize = 256;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct StoredRecord {
    topic: String,
    payload: String,
    timestamp: i64,
}

/// Retained record count and eviction high-water mark.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Retention {
    pub(crate) retained: u64,
    pub(crate) evicted_through: Option<LogId>,
}

impl Retention {
    /// Pops oldest records until at most `capacity` remain. Stops at the
    /// first failure with the count still matching what is stored.
    pub(crate) fn trim(
        &mut self,
        capacity: u64,
        mut pop_oldest: impl FnMut() -> Result<Option<LogId>>,
    ) -> Result<()> {
        while self.retained > capacity {
            match pop_oldest()? {
                Some(id) => {
                    self.retained -= 1;
                    self.evicted_through = Some(id);
                }
                None => {
                    self.retained = 0;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Whether records following `cursor` were evicted before being read.
    fn skipped_past(&self, cursor: Option<LogId>) -> bool {
        match (cursor, self.evicted_through) {
            (Some(cursor), Some(evicted)) => evicted > cursor,
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct SledLog {
    db: Db,
    records: Tree,
    meta: Tree,
    capacity: u64,
    sync_writes: bool,
    // Serializes appends so ids become visible in order.
    retention: Arc<Mutex<Retention>>,
}

impl SledLog {
    /// Open or create a log at `path` retaining at most `capacity` records.
    pub fn open(path: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        Self::with_db(sled::open(path)?, capacity)
    }

    /// A log that is deleted when the last handle is dropped.
    pub fn temporary(capacity: u64) -> Result<Self> {
        Self::with_db(sled::Config::new().temporary(true).open()?, capacity)
    }

    fn with_db(db: Db, capacity: u64) -> Result<Self> {
        let records = db.open_tree(RECORDS_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        let evicted_through = match meta.get(EVICTED_THROUGH)? {
            Some(raw) => Some(decode_key(&raw)?),
            None => None,
        };
        let retention = Retention {
            retained: records.len() as u64,
            evicted_through,
        };
        Ok(Self {
            db,
            records,
            meta,
            capacity: capacity.max(1),
            sync_writes: false,
            retention: Arc::new(Mutex::new(retention)),
        })
    }

    /// Flush to disk before acknowledging each append.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of records currently retained.
    pub fn len(&self) -> u64 {
        self.retention.lock().retained
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest id removed by retention, if any ever was.
    pub fn evicted_through(&self) -> Option<LogId> {
        self.retention.lock().evicted_through
    }

    /// Typed reader over records after `after`; see [`OrderedLog::read_from`].
    pub fn reader(&self, after: Option<LogId>) -> SledLogReader {
        SledLogReader {
            records: self.records.clone(),
            retention: self.retention.clone(),
            cursor: after,
            pending: VecDeque::new(),
            gaps: 0,
        }
    }

    fn pop_oldest(&self) -> Result<Option<LogId>> {
        let Some((key, _)) = self.records.pop_min()? else {
            return Ok(None);
        };
        let id = decode_key(&key)?;
        // The record is gone either way; a missed mark only loses a warning.
        if let Err(e) = self.meta.insert(EVICTED_THROUGH, key) {
            warn!(id, error = %e, "failed to record eviction mark");
        }
        Ok(Some(id))
    }

    /// Oldest retained id.
    pub fn oldest_id(&self) -> Result<Option<LogId>> {
        match self.records.first()? {
            Some((key, _)) => decode_key(&key).map(Some),
            None => Ok(None),
        }
    }
}

impl OrderedLog for SledLog {
    fn append(&self, topic: &str, payload: &str) -> Result<LogId> {
        let stored = StoredRecord {
            topic: topic.to_string(),
            payload: payload.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };
        let value = serde_json::to_vec(&stored)?;

        let mut retention = self.retention.lock();
        let id = self.db.generate_id()?;
        self.records.insert(id.to_be_bytes(), value)?;
        retention.retained += 1;

        // The record is committed and visible to readers from here on.
        if let Err(e) = retention.trim(self.capacity, || self.pop_oldest()) {
            warn!(error = %e, retained = retention.retained, "failed to evict old records");
        }
        if self.sync_writes {
            if let Err(e) = self.db.flush() {
                error!(id, error = %e, "failed to flush log after append");
            }
        }

        Ok(id)
    }

    fn latest_id(&self) -> Result<Option<LogId>> {
        match self.records.last()? {
            Some((key, _)) => decode_key(&key).map(Some),
            None => Ok(None),
        }
    }

    fn read_from(&self, after: Option<LogId>) -> Result<Box<dyn LogReader>> {
        Ok(Box::new(self.reader(after)))
    }
}

impl std::fmt::Debug for SledLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledLog")
            .field("db", &"sled::Db")
            .field("capacity", &self.capacity)
            .finish()
    }
}

pub struct SledLogReader {
    records: Tree,
    retention: Arc<Mutex<Retention>>,
    cursor: Option<LogId>,
    pending: VecDeque<LogRecord>,
    gaps: u64,
}

impl SledLogReader {
    /// Times this reader resumed past records evicted before it read them.
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    /// Scan the next batch after the cursor into `pending`.
    fn fill(&mut self) -> Result<()> {
        // Read before scanning, so a record evicted after this batch picked
        // it up is not reported as a gap.
        let fell_behind = self.retention.lock().skipped_past(self.cursor);

        let lower = match self.cursor {
            Some(id) => Bound::Excluded(id.to_be_bytes()),
            None => Bound::Unbounded,
        };
        for entry in self
            .records
            .range::<[u8; 8], _>((lower, Bound::Unbounded))
            .take(READ_BATCH)
        {
            let (key, value) = entry?;
            self.pending.push_back(decode_record(&key, &value)?);
        }

        if fell_behind {
            if let Some(first) = self.pending.front() {
                self.gaps += 1;
                warn!(
                    cursor = ?self.cursor,
                    resumed_at = first.id,
                    "log reader fell behind retention, resuming at oldest record"
                );
            }
        }
        Ok(())
    }
}

impl LogReader for SledLogReader {
    fn next_timeout(&mut self, wait: Duration) -> Result<Option<LogRecord>> {
        if self.pending.is_empty() {
            self.fill()?;
        }

        if self.pending.is_empty() {
            // Subscribe before rescanning so an insert landing between the
            // two is still seen.
            let mut subscriber = self.records.watch_prefix(Vec::<u8>::new());
            self.fill()?;
            if self.pending.is_empty() {
                match subscriber.next_timeout(wait) {
                    Ok(_) => self.fill()?,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(LogError::Unavailable("log closed".to_string()));
                    }
                }
            }
        }

        let next = self.pending.pop_front();
        if let Some(record) = &next {
            self.cursor = Some(record.id);
            debug!(id = record.id, topic = %record.topic, "read log record");
        }
        Ok(next)
    }
}

fn decode_key(key: &IVec) -> Result<LogId> {
    let bytes: [u8; 8] = key
        .as_ref()
        .try_into()
        .map_err(|_| LogError::CorruptKey(key.len()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_record(key: &IVec, value: &IVec) -> Result<LogRecord> {
    let stored: StoredRecord = serde_json::from_slice(value)?;
    Ok(LogRecord {
        id: decode_key(key)?,
        topic: stored.topic,
        payload: stored.payload,
        timestamp: stored.timestamp,
    })
}
