//! Publish entry point
//!
//! Publishing never delivers anything directly: each entry is appended to
//! the ordered log and reaches subscribers through the replication tailers,
//! exactly like a message sent on a subscriber connection.
//!
//! The HTTP surface is a small `axum` router:
//! - `POST /publish` with `[{"topic": "...", "message": "..."}, ...]`
//! - `GET /health` reporting the tailer state

use std::future::IntoFuture;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::persistence::{LogClient, LogError};
use crate::replication::TailerState;
use crate::transport::message::{ErrorResponse, HealthResponse, PublishRequest};
use crate::transport::{ShutdownSignal, wait_for_shutdown};

/// A batch entry could not be appended. Entries before `index` are durable.
#[derive(thiserror::Error, Debug)]
#[error("failed to publish entry {index} to '{topic}': {source}")]
pub struct PublishError {
    pub index: usize,
    pub topic: String,
    #[source]
    pub source: LogError,
}

/// Appends every entry in order, yielding to the scheduler between entries
/// so a large batch cannot starve connection handling.
///
/// Stops at the first failure; nothing already appended is rolled back.
pub async fn publish_batch(
    log: &LogClient,
    entries: &[PublishRequest],
) -> Result<usize, PublishError> {
    for (index, entry) in entries.iter().enumerate() {
        log.append(&entry.topic, &entry.message)
            .await
            .map_err(|source| PublishError {
                index,
                topic: entry.topic.clone(),
                source,
            })?;
        tokio::task::yield_now().await;
    }
    Ok(entries.len())
}

#[derive(Clone)]
pub struct PublishState {
    pub log: LogClient,
    pub tailer: Option<watch::Receiver<TailerState>>,
}

/// Structured error returned by the publish routes.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        error!(error = %err, "publish request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorResponse {
                code: "publish_failed".to_string(),
                message: format!("entry {} could not be published", err.index),
            },
        }
    }
}

pub fn router(state: PublishState) -> Router {
    Router::new()
        .route("/publish", post(publish_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn publish_handler(
    State(state): State<PublishState>,
    Json(entries): Json<Vec<PublishRequest>>,
) -> Result<&'static str, ApiError> {
    publish_batch(&state.log, &entries).await?;
    Ok("ok")
}

async fn health_handler(State(state): State<PublishState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        tailer: state.tailer.as_ref().map(|rx| *rx.borrow()),
    })
}

/// Serves the publish routes on `addr` until `shutdown` fires.
pub async fn start_publish_server(
    addr: &str,
    state: PublishState,
    shutdown: ShutdownSignal,
    grace: Duration,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Publish endpoint listening on http://{addr}/publish");
    serve_publish(listener, state, shutdown, grace).await
}

/// Serves the publish routes on a bound listener. Once `shutdown` fires,
/// in-flight requests get `grace` to finish before the server stops
/// waiting for them.
pub async fn serve_publish(
    listener: TcpListener,
    state: PublishState,
    shutdown: ShutdownSignal,
    grace: Duration,
) -> std::io::Result<()> {
    let mut stopping = shutdown.clone();
    let mut drain = shutdown;
    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut drain).await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result,
        _ = wait_for_shutdown(&mut stopping) => {}
    }

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Grace period elapsed, abandoning in-flight publish requests");
            Ok(())
        }
    }
}
