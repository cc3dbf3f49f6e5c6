//! Async façade over an [`OrderedLog`].
//!
//! Store calls may block on disk or network I/O, so they run on tokio's
//! blocking pool and never stall the tasks serving connections.

use std::sync::Arc;

use super::{LogId, OrderedLog, Result};

#[derive(Clone)]
pub struct LogClient {
    log: Arc<dyn OrderedLog>,
}

impl LogClient {
    pub fn new(log: Arc<dyn OrderedLog>) -> Self {
        Self { log }
    }

    /// Appends `payload` to `topic` and returns the id the store assigned.
    ///
    /// Store failures are returned to the caller, never swallowed.
    pub async fn append(&self, topic: &str, payload: &str) -> Result<LogId> {
        let log = self.log.clone();
        let topic = topic.to_owned();
        let payload = payload.to_owned();
        tokio::task::spawn_blocking(move || log.append(&topic, &payload)).await?
    }

    pub async fn latest_id(&self) -> Result<Option<LogId>> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || log.latest_id()).await?
    }

    /// The underlying store, for readers that run on their own thread.
    pub fn log(&self) -> Arc<dyn OrderedLog> {
        self.log.clone()
    }
}

impl std::fmt::Debug for LogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogClient").finish_non_exhaustive()
    }
}
