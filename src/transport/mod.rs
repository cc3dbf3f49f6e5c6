//! The `transport` module is responsible for network communication.
//!
//! - `websocket`: subscriber connections addressed as `/ws/<topic>`; every
//!   inbound text frame is appended to the log as a publish on that topic.
//! - `publish`: the batch publish entry point and its HTTP route.
//! - `message`: JSON bodies of the HTTP surface.
//!
//! Both servers stop on the same `watch` shutdown signal.

pub mod message;
pub mod publish;
pub mod websocket;

use tokio::sync::watch;

pub use publish::{PublishError, publish_batch, serve_publish, start_publish_server};
pub use websocket::{serve, start_websocket_server};

/// Flips to `true` once when the process begins shutting down.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Resolves when shutdown is requested or the signal's sender is gone.
pub async fn wait_for_shutdown(signal: &mut ShutdownSignal) {
    let _ = signal.wait_for(|stop| *stop).await;
}
