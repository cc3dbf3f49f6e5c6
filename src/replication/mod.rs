//! The `replication` module turns the shared ordered log into local
//! deliveries.
//!
//! Each broker process runs exactly one [`Tailer`]. It is the only path by
//! which any subscriber receives a message, including a message published
//! on the subscriber's own connection, so every process applies records in
//! log id order.

pub mod tailer;

pub use tailer::{Tailer, TailerOptions, TailerState};
