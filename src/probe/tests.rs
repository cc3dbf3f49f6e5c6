use super::{LatencyStats, ProbeOptions, run_probe};
use crate::broker::Broker;
use crate::persistence::{LogClient, SledLog};
use crate::replication::{Tailer, TailerOptions, TailerState};
use crate::transport::serve;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[test]
fn test_latency_stats_empty() {
    let stats = LatencyStats::from_samples(&[]);
    assert_eq!(stats.count, 0);
    assert_eq!(stats.min, 0.0);
    assert_eq!(stats.avg, 0.0);
}

#[test]
fn test_latency_stats_min_max_avg() {
    let stats = LatencyStats::from_samples(&[
        Duration::from_millis(10),
        Duration::from_millis(20),
        Duration::from_millis(60),
    ]);
    assert_eq!(stats.count, 3);
    assert!((stats.min - 10.0).abs() < 1e-9);
    assert!((stats.max - 60.0).abs() < 1e-9);
    assert!((stats.avg - 30.0).abs() < 1e-9);
    assert!(stats.to_string().contains("Average:      30.00"));
}

#[tokio::test]
async fn test_probe_counts_connection_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let report = run_probe(ProbeOptions {
        url_template: format!("ws://{addr}/ws/{{channel}}"),
        clients: 3,
        concurrency: 2,
        echo_timeout: Duration::from_secs(1),
    })
    .await;

    assert_eq!(report.handshake.count, 0);
    assert_eq!(report.errors.values().sum::<usize>(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_round_trips_against_server() {
    let log = Arc::new(SledLog::temporary(1_000).unwrap());
    let broker = Broker::shared();
    let tailer = Tailer::spawn(
        log.clone(),
        broker.clone(),
        TailerOptions {
            poll_interval: Duration::from_millis(20),
            ..TailerOptions::default()
        },
    )
    .unwrap();
    let mut state = tailer.subscribe_state();
    state
        .wait_for(|s| *s == TailerState::Tailing)
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, signal) = watch::channel(false);
    let server = tokio::spawn(serve(
        listener,
        broker,
        LogClient::new(log),
        signal,
        Duration::from_millis(200),
    ));

    let report = run_probe(ProbeOptions {
        url_template: format!("ws://{addr}/ws/{{channel}}"),
        clients: 5,
        concurrency: 2,
        echo_timeout: Duration::from_secs(5),
    })
    .await;

    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert_eq!(report.handshake.count, 5);
    assert_eq!(report.echo.count, 5);

    let _ = shutdown.send(true);
    server.await.unwrap();
    tailer.shutdown().await;
}
