//! # tailsub
//!
//! `tailsub` is a hierarchical publish/subscribe server for WebSocket
//! clients. Subscribers connect to `/ws/<topic path>`; anything they send is
//! published on that path. Publishing to a path ending in `/` also reaches
//! every subscriber below it.
//!
//! Every message is appended to a shared, ordered, bounded log and delivered
//! only by each process's replication tailer, so any number of broker
//! processes behind a load balancer deliver in the same order.
//!
//! ## Core Modules
//!
//! - `broker`: the topic tree and the clients registered in it.
//! - `client`: the broker-side handle of a subscriber connection.
//! - `config`: loading and merging server configuration.
//! - `persistence`: the ordered log abstraction and its `sled` store.
//! - `replication`: the tailer that turns log records into deliveries.
//! - `transport`: WebSocket connections and the HTTP publish endpoint.
//! - `probe`: an echo round-trip client for smoke and load tests.
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod probe;
pub mod replication;
pub mod transport;
pub mod utils;
