//! Broker engine
//!
//! The broker holds everything one process knows about its own subscribers:
//! the topic tree and the client handle behind every registered id. It is
//! never shared across processes; the ordered log is the only shared state.
//!
//! Concurrency and usage notes:
//! - The API is synchronous and meant to sit behind a lock (`SharedBroker`).
//!   Sends go through unbounded channels, so no call here awaits and the
//!   lock is never held across network I/O.
//! - Messages reach subscribers only through [`Broker::dispatch`], called by
//!   the replication tailer for each log record. Connections never dispatch
//!   what they receive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::topic::{SEPARATOR, SubscriberId, TopicTree};
use crate::client::Client;
use crate::persistence::LogRecord;

pub type SharedBroker = Arc<Mutex<Broker>>;

#[derive(Debug, Default)]
pub struct Broker {
    pub topics: TopicTree,
    pub clients: HashMap<SubscriberId, Client>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBroker {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Registers `client` at its topic path.
    ///
    /// # Panics
    ///
    /// If a client with the same id is already attached.
    pub fn attach(&mut self, client: Client) {
        self.topics.attach(client.id.clone(), &client.topic);
        debug!(client_id = %client.id, topic = %client.topic, "attached");
        self.clients.insert(client.id.clone(), client);
    }

    /// Removes a client and prunes its topic branch. Detaching an unknown or
    /// already detached id is a no-op returning `false`.
    pub fn detach(&mut self, client_id: &SubscriberId) -> bool {
        self.clients.remove(client_id);
        let removed = self.topics.detach(client_id);
        if removed {
            debug!(%client_id, "detached");
        }
        removed
    }

    /// Ids subscribed at `path`, and below it when `subchannels` is set.
    pub fn deliver(&self, path: &str, subchannels: bool) -> Vec<SubscriberId> {
        self.topics.deliver(path, subchannels)
    }

    /// Sends a log record's payload to every local subscriber of its topic.
    ///
    /// A topic ending in the separator also reaches every descendant topic.
    /// Subscribers whose connection is gone are detached. Returns the number
    /// of clients the payload was handed to.
    pub fn dispatch(&mut self, record: &LogRecord) -> usize {
        let subchannels = record.topic.ends_with(SEPARATOR);
        let targets = self.deliver(&record.topic, subchannels);
        if targets.is_empty() {
            return 0;
        }

        let frame = WsMessage::text(record.payload.clone());
        let mut delivered = 0;
        let mut gone = Vec::new();
        for client_id in targets {
            match self.clients.get(&client_id) {
                Some(client) => {
                    if client.sender.send(frame.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        gone.push(client_id);
                    }
                }
                None => {
                    warn!(%client_id, "subscriber in topic tree without a client handle");
                    gone.push(client_id);
                }
            }
        }

        for client_id in gone {
            info!(%client_id, "dropping subscriber with closed connection");
            self.detach(&client_id);
        }

        debug!(
            id = record.id,
            topic = %record.topic,
            delivered,
            "dispatched log record"
        );
        delivered
    }
}
