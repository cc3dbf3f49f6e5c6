//! Replication tailer
//!
//! The tailer is split in two halves joined by a bounded channel:
//! - a reader on a dedicated OS thread that blocks on the log, advancing a
//!   cursor that starts at the newest id present at startup (history is not
//!   replayed);
//! - a dispatcher task on the async runtime that applies each record to the
//!   broker. Only the dispatcher touches the topic tree.
//!
//! State machine: `Starting -> Tailing -> (Retrying <-> Tailing) -> Stopped`.
//! Read failures move the reader to `Retrying`, where it backs off and
//! reopens the log at the same cursor. The stop flag is checked at least
//! once per poll interval, which bounds shutdown latency.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::SharedBroker;
use crate::config::Settings;
use crate::persistence::{LogId, LogRecord, OrderedLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailerState {
    Starting,
    Tailing,
    Retrying,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct TailerOptions {
    /// Longest a single blocking read may wait; also the stop-check period.
    pub poll_interval: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    /// Records buffered between the reader thread and the dispatcher.
    pub buffer: usize,
}

impl Default for TailerOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for TailerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.log.poll_interval(),
            retry_initial: settings.broker.retry_initial(),
            retry_max: settings.broker.retry_max(),
            buffer: settings.broker.dispatch_buffer.max(1),
        }
    }
}

pub struct Tailer {
    stop: Arc<AtomicBool>,
    state: watch::Receiver<TailerState>,
    reader: Option<thread::JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Tailer {
    /// Starts tailing `log` into `broker`. Must be called from within a
    /// tokio runtime.
    pub fn spawn(
        log: Arc<dyn OrderedLog>,
        broker: SharedBroker,
        options: TailerOptions,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (state_tx, state_rx) = watch::channel(TailerState::Starting);
        let (record_tx, record_rx) = mpsc::channel(options.buffer.max(1));

        let reader = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("log-tailer".to_string())
                .spawn(move || {
                    TailReader {
                        log,
                        records: record_tx,
                        state: state_tx,
                        stop,
                        options,
                    }
                    .run()
                })?
        };
        let dispatcher = tokio::spawn(dispatch_records(record_rx, broker));

        Ok(Self {
            stop,
            state: state_rx,
            reader: Some(reader),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn state(&self) -> TailerState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<TailerState> {
        self.state.clone()
    }

    /// Resolves once the reader has fixed its starting cursor and is tailing.
    /// Returns `false` if the tailer stopped first.
    ///
    /// Anything appended before this resolves may land at or below the
    /// starting cursor and is then never delivered, so publishers must not be
    /// admitted until it has.
    pub async fn ready(&self) -> bool {
        let mut state = self.state.clone();
        match state
            .wait_for(|s| matches!(s, TailerState::Tailing | TailerState::Stopped))
            .await
        {
            Ok(reached) => *reached == TailerState::Tailing,
            Err(_) => false,
        }
    }

    /// Stops the reader, then waits for already handed-off records to be
    /// dispatched.
    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            if let Ok(Err(_)) = tokio::task::spawn_blocking(move || reader.join()).await {
                error!("log tailer thread panicked");
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.await;
        }
        info!("log tailer stopped");
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

async fn dispatch_records(mut records: mpsc::Receiver<LogRecord>, broker: SharedBroker) {
    while let Some(record) = records.recv().await {
        broker.lock().dispatch(&record);
    }
}

struct TailReader {
    log: Arc<dyn OrderedLog>,
    records: mpsc::Sender<LogRecord>,
    state: watch::Sender<TailerState>,
    stop: Arc<AtomicBool>,
    options: TailerOptions,
}

impl TailReader {
    fn run(self) {
        if let Some(cursor) = self.start() {
            self.tail(cursor);
        }
        self.set_state(TailerState::Stopped);
    }

    /// Fetches the starting cursor; `None` when stopped first.
    fn start(&self) -> Option<Option<LogId>> {
        let mut backoff = Backoff::new(self.options.retry_initial, self.options.retry_max);
        while !self.stopped() {
            match self.log.latest_id() {
                Ok(cursor) => {
                    info!(?cursor, "tailing log from newest record");
                    self.set_state(TailerState::Tailing);
                    return Some(cursor);
                }
                Err(e) => {
                    warn!(error = %e, "failed to read log head, retrying");
                    self.set_state(TailerState::Retrying);
                    self.sleep(backoff.next_delay());
                }
            }
        }
        None
    }

    fn tail(&self, mut cursor: Option<LogId>) {
        let mut backoff = Backoff::new(self.options.retry_initial, self.options.retry_max);

        'reopen: while !self.stopped() {
            let mut reader = match self.log.read_from(cursor) {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(error = %e, ?cursor, "failed to open log reader, retrying");
                    self.set_state(TailerState::Retrying);
                    self.sleep(backoff.next_delay());
                    continue;
                }
            };

            while !self.stopped() {
                match reader.next_timeout(self.options.poll_interval) {
                    Ok(Some(record)) => {
                        self.set_state(TailerState::Tailing);
                        backoff.reset();
                        cursor = Some(record.id);
                        if self.records.blocking_send(record).is_err() {
                            debug!("dispatcher gone, stopping log reader");
                            return;
                        }
                    }
                    Ok(None) => {
                        self.set_state(TailerState::Tailing);
                        backoff.reset();
                    }
                    Err(e) => {
                        warn!(error = %e, ?cursor, "log read failed, retrying");
                        self.set_state(TailerState::Retrying);
                        self.sleep(backoff.next_delay());
                        continue 'reopen;
                    }
                }
            }
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.records.is_closed()
    }

    fn set_state(&self, next: TailerState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = ?*current, to = ?next, "tailer state change");
                *current = next;
                true
            }
        });
    }

    /// Sleeps in poll-interval slices so a stop request is noticed promptly.
    fn sleep(&self, total: Duration) {
        let slice = self.options.poll_interval.max(Duration::from_millis(1));
        let mut remaining = total;
        while !remaining.is_zero() && !self.stopped() {
            let step = remaining.min(slice);
            thread::sleep(step);
            remaining -= step;
        }
    }
}

/// Exponential backoff doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}
