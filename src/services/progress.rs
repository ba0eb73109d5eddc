use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::job::{derive_key, ArtifactKind, CountStats, JobId, ResultRecord, StatusSnapshot};
use crate::services::storage::{ArtifactStore, StorageError};
use crate::tracking::engine::ProgressReporter;

/// Writes status snapshots and result records for jobs.
///
/// Every write is best-effort: a failure is logged and the job carries on.
#[derive(Clone)]
pub struct ProgressPublisher {
    store: Arc<dyn ArtifactStore>,
    container: String,
}

impl ProgressPublisher {
    pub fn new(store: Arc<dyn ArtifactStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    pub async fn publish_progress(&self, job_id: &JobId, percent: u8) {
        let snapshot = StatusSnapshot::processing(job_id, percent);
        let key = derive_key(job_id, ArtifactKind::Status);
        if let Err(e) = self.write_json(&key, &snapshot).await {
            tracing::warn!(job_id = %job_id, percent, error = %e, "Failed to publish progress");
        }
    }

    /// Result record first, then the terminal 100% snapshot.
    pub async fn publish_result(&self, job_id: &JobId, stats: CountStats) {
        let record = ResultRecord::completed(job_id, stats);
        let key = derive_key(job_id, ArtifactKind::Result);
        if let Err(e) = self.write_json(&key, &record).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to publish result");
        }

        let snapshot = StatusSnapshot::completed(job_id);
        let key = derive_key(job_id, ArtifactKind::Status);
        if let Err(e) = self.write_json(&key, &snapshot).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to publish completed status");
        }
    }

    /// Reporter bound to one job, for the counting engine.
    pub fn for_job<'a>(&'a self, job_id: &'a JobId) -> JobProgress<'a> {
        JobProgress {
            publisher: self,
            job_id,
        }
    }

    async fn write_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| StorageError::Config(format!("serialize {}: {}", key, e)))?;
        self.store
            .put(&self.container, key, &body, "application/json")
            .await?;
        Ok(())
    }
}

pub struct JobProgress<'a> {
    publisher: &'a ProgressPublisher,
    job_id: &'a JobId,
}

#[async_trait]
impl ProgressReporter for JobProgress<'_> {
    async fn report(&self, percent: u8) {
        tracing::debug!(job_id = %self.job_id, percent, "Progress");
        self.publisher.publish_progress(self.job_id, percent).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::services::memory::MemoryArtifactStore;

    async fn read<T: serde::de::DeserializeOwned>(store: &MemoryArtifactStore, key: &str) -> T {
        serde_json::from_slice(&store.get("out", key).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_progress_overwrites_snapshot() {
        let store = Arc::new(MemoryArtifactStore::new());
        let publisher = ProgressPublisher::new(store.clone(), "out");
        let id = JobId::from("job-1");

        publisher.publish_progress(&id, 0).await;
        publisher.for_job(&id).report(40).await;

        let snapshot: StatusSnapshot = read(&store, "job-1_status.json").await;
        assert_eq!(snapshot.status, JobStatus::Processing);
        assert_eq!(snapshot.progress_percent, 40);
        assert_eq!(store.list("out").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_result_then_completed_snapshot() {
        let store = Arc::new(MemoryArtifactStore::new());
        let publisher = ProgressPublisher::new(store.clone(), "out");
        let id = JobId::from("job-2");

        publisher.publish_result(&id, CountStats::new(3, 2)).await;

        let record: ResultRecord = read(&store, "job-2.json").await;
        assert_eq!(record.total_count, 5);
        assert_eq!(record.status, JobStatus::Completed);
        let snapshot: StatusSnapshot = read(&store, "job-2_status.json").await;
        assert_eq!(snapshot.progress_percent, 100);
        assert_eq!(snapshot.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_write_failures_are_swallowed() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.set_fail_writes(true);
        let publisher = ProgressPublisher::new(store.clone(), "out");
        let id = JobId::from("job-3");

        publisher.publish_progress(&id, 10).await;
        publisher.publish_result(&id, CountStats::default()).await;
        assert_eq!(store.write_count(), 0);
    }
}
