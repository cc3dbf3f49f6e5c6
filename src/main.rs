//! CLI for tailsub
//!
//! Subcommands:
//! - `server`: run the WebSocket server, the publish endpoint and the tailer
//! - `probe`: open echo clients against a running server
//! - `config`: print the effective configuration

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use tailsub::broker::Broker;
use tailsub::config::{Settings, load_config};
use tailsub::persistence::{LogClient, SledLog};
use tailsub::probe::{ProbeOptions, run_probe};
use tailsub::replication::{Tailer, TailerOptions};
use tailsub::transport::publish::PublishState;
use tailsub::transport::{start_publish_server, start_websocket_server};
use tailsub::utils::error::{Error, Result};
use tailsub::utils::logging;

#[derive(Parser)]
#[command(name = "tailsub", version)]
struct Cli {
    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the broker
    Server,
    /// Send one message per client and wait for it to echo back
    Probe {
        /// Subscriber URL; `{channel}` is replaced by `client/<n>`
        #[arg(long, default_value = "ws://127.0.0.1:8080/ws/{channel}")]
        url: String,
        #[arg(long, default_value_t = 2000)]
        clients: usize,
        #[arg(long, default_value_t = 100)]
        concurrency: usize,
        /// Seconds each client waits for its echo
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let outcome = match cli.command {
        Command::Server => run_server().await,
        Command::Probe {
            url,
            clients,
            concurrency,
            timeout,
        } => {
            let report = run_probe(ProbeOptions {
                url_template: url,
                clients,
                concurrency,
                echo_timeout: Duration::from_secs(timeout),
            })
            .await;
            println!("{report}");
            Ok(())
        }
        Command::Config => print_config(),
    };

    if let Err(e) = outcome {
        error!("{e}");
        std::process::exit(1);
    }
}

fn print_config() -> Result<()> {
    let settings = load_config()?;
    match serde_json::to_string_pretty(&settings) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to render configuration: {e}"),
    }
    Ok(())
}

async fn run_server() -> Result<()> {
    let settings: Settings = load_config()?;
    let ws_addr = format!("{}:{}", settings.server.host, settings.server.port);
    let publish_addr = format!("{}:{}", settings.server.host, settings.server.publish_port);

    let log = SledLog::open(&settings.log.path, settings.log.capacity)?
        .with_sync_writes(settings.log.sync_writes);
    info!(
        path = %settings.log.path,
        capacity = settings.log.capacity,
        "opened ordered log"
    );
    let log = LogClient::new(Arc::new(log));

    let broker = Broker::shared();
    let tailer = Tailer::spawn(log.log(), broker.clone(), TailerOptions::from(&settings))?;

    // Listeners open only once the tailer has its starting cursor.
    let positioned = tokio::select! {
        ready = tailer.ready() => Some(ready),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutdown requested while waiting for the log tailer.");
            None
        }
    };
    match positioned {
        Some(true) => {}
        Some(false) => {
            tailer.shutdown().await;
            return Err(Error::TailerStopped);
        }
        None => {
            tailer.shutdown().await;
            return Ok(());
        }
    }

    let grace = settings.broker.shutdown_grace();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let websocket = start_websocket_server(
        &ws_addr,
        broker.clone(),
        log.clone(),
        shutdown_rx.clone(),
        grace,
    );
    let publish = start_publish_server(
        &publish_addr,
        PublishState {
            log: log.clone(),
            tailer: Some(tailer.subscribe_state()),
        },
        shutdown_rx,
        grace,
    );
    let servers = async { tokio::try_join!(websocket, publish) };
    tokio::pin!(servers);

    let outcome = tokio::select! {
        outcome = &mut servers => {
            error!("Server exited unexpectedly.");
            outcome
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received. Exiting gracefully."),
                Err(e) => error!("Failed to listen for shutdown signal: {e}"),
            }
            let _ = shutdown_tx.send(true);
            (&mut servers).await
        }
    };

    tailer.shutdown().await;
    outcome?;
    Ok(())
}
