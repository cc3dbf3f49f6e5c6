//! Client representation
//!
//! `Client` models one subscriber connection and holds the sending side of
//! the per-connection channel that the connection's write loop drains.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::SubscriberId;

#[derive(Debug)]
pub struct Client {
    pub id: SubscriberId,
    /// Topic path the connection subscribed to, as requested.
    pub topic: String,
    pub sender: UnboundedSender<WsMessage>,
}

impl Client {
    /// Create a new client with a sender channel. The `id` is a UUID used
    /// to identify the client across broker operations.
    pub fn new(topic: &str, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            sender,
        }
    }
}
