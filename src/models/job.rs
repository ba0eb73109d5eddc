use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Opaque job identifier. The gateway mints UUIDs, but the worker accepts any
/// string that survives descriptor validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept an externally supplied id only when it is usable as a file name.
    pub fn parse(value: &str) -> Option<Self> {
        local_name(&value, &()).ok().map(|_| Self(value.to_string()))
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a counting job as seen by snapshot readers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
}

/// Job payload serialized into the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct JobDescriptor {
    #[garde(custom(local_name))]
    pub job_id: JobId,

    /// Artifact key of the raw upload in the input container.
    #[garde(custom(local_name))]
    pub filename: String,

    #[garde(skip)]
    pub status: JobStatus,
}

impl JobDescriptor {
    pub fn new(job_id: JobId, filename: String) -> Self {
        Self {
            job_id,
            filename,
            status: JobStatus::Pending,
        }
    }

    /// Extension of the raw artifact, without the dot.
    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Descriptor fields end up as local file names on the worker.
fn local_name<T: AsRef<str>>(value: &T, _ctx: &()) -> garde::Result {
    let value = value.as_ref();
    if value.is_empty() || value.len() > 255 {
        return Err(garde::Error::new("length must be between 1 and 255 bytes"));
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(garde::Error::new("must not contain path separators or '..'"));
    }
    Ok(())
}

/// Overwritten at [`ArtifactKind::Status`]; last write wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn processing(job_id: &JobId, percent: u8) -> Self {
        Self {
            job_id: job_id.clone(),
            status: JobStatus::Processing,
            progress_percent: percent.min(100),
            updated_at: Utc::now(),
        }
    }

    pub fn completed(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.clone(),
            status: JobStatus::Completed,
            progress_percent: 100,
            updated_at: Utc::now(),
        }
    }
}

/// Final counts produced by the counting engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountStats {
    pub total_in: u64,
    pub total_out: u64,
    pub total_count: u64,
}

impl CountStats {
    pub fn new(total_in: u64, total_out: u64) -> Self {
        Self {
            total_in,
            total_out,
            total_count: total_in + total_out,
        }
    }
}

/// Written once per successful job at [`ArtifactKind::Result`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_in: u64,
    pub total_out: u64,
    pub total_count: u64,
}

impl ResultRecord {
    pub fn completed(job_id: &JobId, stats: CountStats) -> Self {
        Self {
            job_id: job_id.clone(),
            status: JobStatus::Completed,
            total_in: stats.total_in,
            total_out: stats.total_out,
            total_count: stats.total_count,
        }
    }
}

/// Artifacts a job owns in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind<'a> {
    /// Upload as received by the gateway (input container).
    RawVideo { extension: &'a str },
    /// Annotated video produced by the worker (output container).
    ProcessedVideo { extension: &'a str },
    Status,
    Result,
}

/// Derive the storage key of a job artifact from its id.
///
/// Keys are built from the id rather than by rewriting another key, so a
/// base name that happens to contain an extension pattern is never mangled.
pub fn derive_key(job_id: &JobId, kind: ArtifactKind<'_>) -> String {
    match kind {
        ArtifactKind::RawVideo { extension } | ArtifactKind::ProcessedVideo { extension } => {
            format!("{}.{}", job_id, extension)
        }
        ArtifactKind::Status => format!("{}_status.json", job_id),
        ArtifactKind::Result => format!("{}.json", job_id),
    }
}
