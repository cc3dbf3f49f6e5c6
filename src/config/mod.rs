mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, LogSettings, ServerSettings, Settings};

/// Loads the configuration from `config/default` and `TAILSUB__*` environment
/// variables, then merges it over `Settings::default()`.
///
/// Environment keys use `__` between levels, e.g. `TAILSUB__LOG__CAPACITY`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("TAILSUB")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    let server = partial.server.as_ref();
    let log = partial.log.as_ref();
    let broker = partial.broker.as_ref();

    Ok(Settings {
        server: ServerSettings {
            host: server
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server.and_then(|s| s.port).unwrap_or(default.server.port),
            publish_port: server
                .and_then(|s| s.publish_port)
                .unwrap_or(default.server.publish_port),
        },
        log: LogSettings {
            path: log.and_then(|l| l.path.clone()).unwrap_or(default.log.path),
            capacity: log
                .and_then(|l| l.capacity)
                .unwrap_or(default.log.capacity),
            poll_interval_ms: log
                .and_then(|l| l.poll_interval_ms)
                .unwrap_or(default.log.poll_interval_ms),
            sync_writes: log
                .and_then(|l| l.sync_writes)
                .unwrap_or(default.log.sync_writes),
        },
        broker: BrokerSettings {
            retry_initial_ms: broker
                .and_then(|b| b.retry_initial_ms)
                .unwrap_or(default.broker.retry_initial_ms),
            retry_max_ms: broker
                .and_then(|b| b.retry_max_ms)
                .unwrap_or(default.broker.retry_max_ms),
            dispatch_buffer: broker
                .and_then(|b| b.dispatch_buffer)
                .unwrap_or(default.broker.dispatch_buffer),
            shutdown_grace_ms: broker
                .and_then(|b| b.shutdown_grace_ms)
                .unwrap_or(default.broker.shutdown_grace_ms),
        },
    })
}

#[cfg(test)]
mod tests;
