use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::app_state::AppState;
use crate::models::job::{derive_key, ArtifactKind, JobId, ResultRecord, StatusSnapshot};
use crate::models::submission::{ErrorResponse, SubmitResponse};
use crate::services::submission::{accepted_extension, submit_job_file as submit, SubmitError};

/// POST /submit-job: multipart upload with the clip in field `file`.
///
/// The file field is spooled to a temporary file chunk by chunk, so an
/// upload is never held in memory whole.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, SubmitError> {
    let spool_root = state.config.work_dir();
    tokio::fs::create_dir_all(&spool_root).await?;
    let spool = tempfile::Builder::new()
        .prefix("herd-upload-")
        .tempdir_in(&spool_root)?;
    let spool_path = spool.path().join("upload");
    let mut filename: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| SubmitError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        // reject before spooling anything
        accepted_extension(&name)?;

        let mut file = tokio::fs::File::create(&spool_path).await?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| SubmitError::Validation(format!("Failed to read upload: {}", e)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        filename = Some(name);
    }

    let filename = filename.ok_or_else(|| SubmitError::Validation("Missing file field".to_string()))?;

    let response = submit(
        state.store.as_ref(),
        state.queue.as_ref(),
        &state.config.input_container,
        &filename,
        &spool_path,
    )
    .await?;
    metrics::counter!("jobs_submitted_total").increment(1);

    if let Err(e) = spool.close() {
        tracing::warn!(error = %e, "Failed to remove upload spool");
    }
    Ok(Json(response))
}

/// GET /jobs/{job_id}/status
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusSnapshot>, LookupError> {
    let job_id = JobId::parse(&job_id).ok_or(LookupError::NotFound)?;
    read_json(&state, &derive_key(&job_id, ArtifactKind::Status))
        .await
        .map(Json)
}

/// GET /jobs/{job_id}/result
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ResultRecord>, LookupError> {
    let job_id = JobId::parse(&job_id).ok_or(LookupError::NotFound)?;
    read_json(&state, &derive_key(&job_id, ArtifactKind::Result))
        .await
        .map(Json)
}

async fn read_json<T: DeserializeOwned>(state: &AppState, key: &str) -> Result<T, LookupError> {
    let body = state
        .store
        .get(&state.config.output_container, key)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                LookupError::NotFound
            } else {
                tracing::error!(key = %key, error = %e, "Failed to read job artifact");
                LookupError::Unavailable
            }
        })?;
    serde_json::from_slice(&body).map_err(|e| {
        tracing::error!(key = %key, error = %e, "Job artifact is not valid JSON");
        LookupError::Unavailable
    })
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            SubmitError::Validation(_) => {
                metrics::counter!("jobs_rejected_total").increment(1);
                (StatusCode::BAD_REQUEST, "validation_failed")
            }
            SubmitError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_failed"),
            SubmitError::Queue(_) => (StatusCode::INTERNAL_SERVER_ERROR, "queue_failed"),
            SubmitError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upload_failed"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Job submission failed");
        } else {
            tracing::warn!(error = %self, "Job submission rejected");
        }
        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug)]
pub enum LookupError {
    NotFound,
    Unavailable,
}

impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            LookupError::NotFound => (StatusCode::NOT_FOUND, "not_found", "No such job artifact"),
            LookupError::Unavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_failed",
                "Job artifact could not be read",
            ),
        };
        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                detail: detail.to_string(),
            }),
        )
            .into_response()
    }
}
