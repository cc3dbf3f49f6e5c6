//! WebSocket transport
//!
//! Accepts subscriber connections at `/ws/<topic>` (percent-decoded) and
//! runs one handler per connection:
//! - attach a `Client` for the requested topic to the broker
//! - forward every inbound text frame to the ordered log as a publish on
//!   that topic, and nothing else: delivery, including back to the sender,
//!   happens later through the replication tailer
//! - drain the client's outbound channel into the socket
//! - detach from the broker on every exit path, aborts included
//!
//! On shutdown the listener stops accepting, each connection is sent a Close
//! frame, and handlers still running after the grace period are aborted.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{SharedBroker, SubscriberId};
use crate::client::Client;
use crate::persistence::LogClient;
use crate::transport::{ShutdownSignal, wait_for_shutdown};

const WS_PREFIX: &str = "/ws/";

/// Binds `addr` and serves subscriber connections until `shutdown` fires.
pub async fn start_websocket_server(
    addr: &str,
    broker: SharedBroker,
    log: LogClient,
    shutdown: ShutdownSignal,
    grace: Duration,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{addr}{WS_PREFIX}<topic>");
    serve(listener, broker, log, shutdown, grace).await;
    Ok(())
}

/// Accept loop over an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broker: SharedBroker,
    log: LogClient,
    mut shutdown: ShutdownSignal,
    grace: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        broker.clone(),
                        log.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept connection: {e}"),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Connection handler panicked: {e}");
                    }
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    drop(listener);
    info!(open = connections.len(), "WebSocket server draining connections");

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "Grace period elapsed, closing remaining connections"
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
    info!("WebSocket server stopped");
}

/// Extracts the topic from a `/ws/<topic>` request path.
pub fn topic_from_path(path: &str) -> Option<String> {
    let raw = path.strip_prefix(WS_PREFIX)?;
    if raw.is_empty() {
        return None;
    }
    urlencoding::decode(raw).ok().map(|topic| topic.into_owned())
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("expected /ws/<topic>".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Detaches its client from the broker when dropped.
struct DetachGuard {
    broker: SharedBroker,
    client_id: SubscriberId,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.broker.lock().detach(&self.client_id);
        debug!(client_id = %self.client_id, "connection cleaned up");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: SharedBroker,
    log: LogClient,
    mut shutdown: ShutdownSignal,
) {
    let mut requested = None;
    let ws_stream = match accept_hdr_async(stream, |req: &Request, resp: Response| {
        match topic_from_path(req.uri().path()) {
            Some(topic) => {
                requested = Some(topic);
                Ok(resp)
            }
            None => Err(not_found()),
        }
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, "WebSocket handshake error: {e}");
            return;
        }
    };
    let Some(topic) = requested else {
        return;
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(&topic, tx.clone());
    let client_id = client.id.clone();
    broker.lock().attach(client);
    info!(%peer, %client_id, %topic, "subscriber connected");

    let guard = DetachGuard {
        broker: broker.clone(),
        client_id: client_id.clone(),
    };

    let read_loop = {
        let client_id = client_id.clone();
        async move {
            loop {
                tokio::select! {
                    inbound = ws_receiver.next() => match inbound {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Err(e) = log.append(&topic, text.as_str()).await {
                                error!(%client_id, %topic, "Failed to publish message: {e}");
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(%client_id, "Connection error: {e}");
                            break;
                        }
                    },
                    _ = wait_for_shutdown(&mut shutdown) => {
                        let _ = tx.send(WsMessage::Close(None));
                        break;
                    }
                }
            }
            // Detaching drops the broker's sender; with `tx` gone too the
            // write loop drains what is queued and ends.
            drop(guard);
            drop(tx);
        }
    };

    let write_loop = {
        let client_id = client_id.clone();
        async move {
            while let Some(msg) = rx.recv().await {
                let closing = msg.is_close();
                if let Err(e) = ws_sender.send(msg).await {
                    debug!(%client_id, "Failed to send message: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        }
    };

    tokio::join!(read_loop, write_loop);
    info!(%peer, %client_id, "subscriber disconnected");
}
