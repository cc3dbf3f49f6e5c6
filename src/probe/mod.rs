//! Echo probe
//!
//! Opens many subscriber connections, each on its own `client/<n>` topic,
//! sends one message per connection and waits for it to come back through
//! the log. Reports handshake and round-trip latency, which makes it a
//! smoke test and a rough load test of a running deployment.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use tungstenite::protocol::Message as WsMessage;

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Subscriber URL with a `{channel}` placeholder.
    pub url_template: String,
    pub clients: usize,
    /// Connections allowed in flight at once.
    pub concurrency: usize,
    /// How long a client waits for its echo.
    pub echo_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            url_template: "ws://127.0.0.1:8080/ws/{channel}".to_string(),
            clients: 100,
            concurrency: 100,
            echo_timeout: Duration::from_secs(10),
        }
    }
}

/// Min / max / average of a set of samples, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
}

impl LatencyStats {
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                avg: 0.0,
                count: 0,
            };
        }
        let millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        let min = millis.iter().copied().fold(f64::INFINITY, f64::min);
        let max = millis.iter().copied().fold(0.0, f64::max);
        let avg = millis.iter().sum::<f64>() / millis.len() as f64;
        Self {
            min,
            max,
            avg,
            count: millis.len(),
        }
    }
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Average: {:10.2}    Min: {:10.2}    Max: {:10.2}",
            self.avg, self.min, self.max
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub elapsed: Duration,
    pub handshake: LatencyStats,
    pub echo: LatencyStats,
    pub errors: BTreeMap<String, usize>,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Clients finished in {:.2} sec.", self.elapsed.as_secs_f64())?;
        writeln!(f, "Handshake times (msec):\n  {}", self.handshake)?;
        writeln!(f, "Echo response times (msec):\n  {}", self.echo)?;
        if !self.errors.is_empty() {
            writeln!(f, "Errors:")?;
            for (error, count) in &self.errors {
                writeln!(f, "  {error}: {count}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ClientOutcome {
    handshake: Option<Duration>,
    echo: Option<Duration>,
    error: Option<String>,
}

/// Runs the probe to completion. Individual client failures are counted in
/// the report rather than returned.
pub async fn run_probe(options: ProbeOptions) -> ProbeReport {
    let started = Instant::now();
    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut clients = JoinSet::new();

    for client_id in 0..options.clients {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let url = options
            .url_template
            .replace("{channel}", &format!("client/{client_id}"));
        let echo_timeout = options.echo_timeout;
        clients.spawn(async move {
            let outcome = probe_client(client_id, &url, echo_timeout).await;
            drop(permit);
            outcome
        });
        if client_id % 100 == 0 {
            info!(
                created = client_id,
                active = clients.len(),
                "probe clients running"
            );
        }
    }

    let mut handshakes = Vec::new();
    let mut echoes = Vec::new();
    let mut errors = BTreeMap::new();
    while let Some(joined) = clients.join_next().await {
        let outcome = joined.unwrap_or_else(|e| ClientOutcome {
            error: Some(e.to_string()),
            ..ClientOutcome::default()
        });
        handshakes.extend(outcome.handshake);
        echoes.extend(outcome.echo);
        if let Some(error) = outcome.error {
            *errors.entry(error).or_insert(0) += 1;
        }
    }

    ProbeReport {
        elapsed: started.elapsed(),
        handshake: LatencyStats::from_samples(&handshakes),
        echo: LatencyStats::from_samples(&echoes),
        errors,
    }
}

async fn probe_client(client_id: usize, url: &str, echo_timeout: Duration) -> ClientOutcome {
    let mut outcome = ClientOutcome::default();

    let connecting = Instant::now();
    let mut ws = match connect_async(url).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };
    outcome.handshake = Some(connecting.elapsed());

    let message = format!("Message #1   from client #{client_id:<5}");
    let sent = Instant::now();
    if let Err(e) = ws.send(WsMessage::text(message.clone())).await {
        outcome.error = Some(e.to_string());
        return outcome;
    }

    let echoed = tokio::time::timeout(echo_timeout, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(WsMessage::Text(text)) if text.as_str() == message => return Ok(()),
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => return Err(e.to_string()),
            }
        }
        Err("connection closed before echo".to_string())
    })
    .await;

    match echoed {
        Ok(Ok(())) => outcome.echo = Some(sent.elapsed()),
        Ok(Err(e)) => outcome.error = Some(e),
        Err(_) => outcome.error = Some("timed out waiting for echo".to_string()),
    }
    debug!(client_id, ?outcome, "probe client finished");
    let _ = ws.close(None).await;
    outcome
}

#[cfg(test)]
mod tests;
