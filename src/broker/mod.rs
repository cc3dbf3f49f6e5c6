//! The `broker` module owns the per-process subscriber state: the topic tree
//! and the connected clients registered in it.

pub mod engine;
pub mod topic;

pub use engine::{Broker, SharedBroker};
pub use topic::{SubscriberId, TopicTree};

#[cfg(test)]
mod tests;
