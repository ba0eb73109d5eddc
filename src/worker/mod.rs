//! Job dispatch: lease a job, count, publish, acknowledge.

pub mod dispatch;

pub use dispatch::{DispatchSettings, Dispatcher, PollOutcome};

use crate::media::MediaError;
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;
use crate::tracking::EngineError;

/// Anything that aborts a single job. Every variant leaves the lease to expire.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Counting failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Work directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Whether a later redelivery of the same job could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::InvalidDescriptor(_) | JobError::Media(_) => false,
            JobError::Storage(e) => !e.is_not_found(),
            JobError::Queue(_) | JobError::Io(_) => true,
            JobError::Engine(EngineError::Detector(_)) => true,
            JobError::Engine(EngineError::Media(_) | EngineError::DegenerateLine) => false,
        }
    }
}
