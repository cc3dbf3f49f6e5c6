//! The `client` module defines the broker-side handle of a subscriber
//! connection.

pub mod pubsub_client;
pub use pubsub_client::Client;
