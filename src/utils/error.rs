//! Top-level error type for the `tailsub` binary and server wiring.
//!
//! Component errors (`LogError`, `PublishError`) live next to the code that
//! produces them; this enum is what the binary's entry points surface.

use crate::persistence::LogError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log error: {0}")]
    Log(#[from] LogError),
    #[error("log tailer stopped before reaching the log head")]
    TailerStopped,
}
