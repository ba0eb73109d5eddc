use serde::{Deserialize, Serialize};

use crate::models::job::JobId;

/// Response after submitting a clip for counting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub artifact_key: String,
    pub status: String,
    pub message: String,
}

/// Fixed liveness record returned by the health probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Error body returned by the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
}
