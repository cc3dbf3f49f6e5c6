use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration settings for the application.
///
/// Includes settings for the listeners, the shared log and the broker.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub log: LogSettings,
    pub broker: BrokerSettings,
}

/// Configuration settings for the server.
///
/// `port` serves WebSocket subscribers, `publish_port` the HTTP publish route.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub publish_port: u16,
}

/// Configuration of the ordered log backing store.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogSettings {
    pub path: String,
    /// Maximum number of records retained; older ones are evicted.
    pub capacity: u64,
    pub poll_interval_ms: u64,
    /// Flush to disk before acknowledging each append.
    pub sync_writes: bool,
}

/// Configuration settings for the broker.
///
/// Controls the replication tailer's retry backoff, the hand-off buffer
/// between the tailer thread and the dispatcher, and the shutdown grace.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrokerSettings {
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub dispatch_buffer: usize,
    pub shutdown_grace_ms: u64,
}

impl LogSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl BrokerSettings {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub log: Option<PartialLogSettings>,
    pub broker: Option<PartialBrokerSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub publish_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub path: Option<String>,
    pub capacity: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub sync_writes: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub retry_initial_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
    pub dispatch_buffer: Option<usize>,
    pub shutdown_grace_ms: Option<u64>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                publish_port: 8081,
            },
            log: LogSettings {
                path: "tailsub_log".to_string(),
                capacity: 1000,
                poll_interval_ms: 100,
                sync_writes: false,
            },
            broker: BrokerSettings {
                retry_initial_ms: 100,
                retry_max_ms: 5000,
                dispatch_buffer: 1024,
                shutdown_grace_ms: 1000,
            },
        }
    }
}
