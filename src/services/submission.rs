use std::path::Path;

use crate::models::job::{derive_key, ArtifactKind, JobDescriptor, JobId};
use crate::models::submission::SubmitResponse;
use crate::services::queue::{enqueue_healing, DurableQueue, QueueError};
use crate::services::storage::{ArtifactStore, StorageError};

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["mp4", "mov", "avi"];

/// Lower-cased extension of an accepted upload name.
pub fn accepted_extension(filename: &str) -> Result<String, SubmitError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| SubmitError::Validation(format!("{} has no file extension", filename)))?;

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(SubmitError::Validation(format!(
            "Unsupported file type .{}; expected one of {}",
            extension,
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    Ok(extension)
}

fn content_type(extension: &str) -> &'static str {
    match extension {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

fn raw_artifact_key(job_id: &JobId, extension: &str) -> String {
    derive_key(job_id, ArtifactKind::RawVideo { extension })
}

/// Store an uploaded clip held in memory and enqueue a job for it.
///
/// The upload and the enqueue are not transactional: if the enqueue fails
/// the raw artifact stays behind unreferenced.
pub async fn submit_job(
    store: &dyn ArtifactStore,
    queue: &dyn DurableQueue,
    input_container: &str,
    filename: &str,
    bytes: &[u8],
) -> Result<SubmitResponse, SubmitError> {
    let extension = accepted_extension(filename)?;
    let job_id = JobId::generate();
    let artifact_key = raw_artifact_key(&job_id, &extension);

    store
        .put(input_container, &artifact_key, bytes, content_type(&extension))
        .await?;
    tracing::info!(
        job_id = %job_id,
        artifact_key = %artifact_key,
        size = bytes.len(),
        "Raw video stored"
    );

    enqueue_job(queue, job_id, artifact_key).await
}

/// Like [`submit_job`], for an upload spooled to a local file. The file is
/// streamed to storage rather than read into memory.
pub async fn submit_job_file(
    store: &dyn ArtifactStore,
    queue: &dyn DurableQueue,
    input_container: &str,
    filename: &str,
    path: &Path,
) -> Result<SubmitResponse, SubmitError> {
    let extension = accepted_extension(filename)?;
    let job_id = JobId::generate();
    let artifact_key = raw_artifact_key(&job_id, &extension);

    store.put_file(input_container, &artifact_key, path).await?;
    tracing::info!(job_id = %job_id, artifact_key = %artifact_key, "Raw video stored");

    enqueue_job(queue, job_id, artifact_key).await
}

async fn enqueue_job(
    queue: &dyn DurableQueue,
    job_id: JobId,
    artifact_key: String,
) -> Result<SubmitResponse, SubmitError> {
    let descriptor = JobDescriptor::new(job_id.clone(), artifact_key.clone());
    let payload = serde_json::to_string(&descriptor).map_err(QueueError::from)?;
    let message_id = enqueue_healing(queue, &payload).await?;
    tracing::info!(job_id = %job_id, message_id = %message_id, "Job enqueued");

    Ok(SubmitResponse {
        job_id,
        artifact_key,
        status: "queued".to_string(),
        message: "Video queued for counting".to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to enqueue job: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to spool upload: {0}")]
    Io(#[from] std::io::Error),
}
