use serde::{Deserialize, Serialize};

use crate::replication::TailerState;

/// One entry of a `POST /publish` batch.
///
/// `channel` is accepted in place of `topic` for older publishers.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublishRequest {
    #[serde(alias = "channel")]
    pub topic: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HealthResponse {
    pub tailer: Option<TailerState>,
}
