use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use garde::Validate;
use tokio::sync::watch;

use crate::config::{AppConfig, CountingConfig};
use crate::media::VideoCodec;
use crate::models::job::{derive_key, ArtifactKind, CountStats, JobDescriptor, JobId};
use crate::services::detector::Detector;
use crate::services::progress::ProgressPublisher;
use crate::services::queue::{receive_healing, DurableQueue, LeasedMessage, QueueError};
use crate::services::storage::ArtifactStore;
use crate::tracking::engine::CountingEngine;
use crate::worker::JobError;

/// Processed videos keep the upload's container format; this covers uploads
/// whose key somehow has none.
const FALLBACK_EXTENSION: &str = "mp4";

/// Queue and storage settings of the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub input_container: String,
    pub output_container: String,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub work_dir: PathBuf,
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            input_container: config.input_container.clone(),
            output_container: config.output_container.clone(),
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
            work_dir: config.work_dir(),
        }
    }
}

/// What one poll of the queue did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The queue had nothing ready.
    Idle,
    /// The job finished; `acked` is false when the lease had already expired.
    Completed {
        job_id: JobId,
        stats: CountStats,
        acked: bool,
    },
    /// The job failed and its lease was left to expire.
    Failed { job_id: JobId, transient: bool },
    /// The payload was not a valid job descriptor and was left un-acked.
    Malformed { message_id: String },
}

/// Leases jobs one at a time and runs them to completion.
pub struct Dispatcher {
    store: Arc<dyn ArtifactStore>,
    queue: Arc<dyn DurableQueue>,
    detector: Arc<dyn Detector>,
    codec: Arc<dyn VideoCodec>,
    counting: CountingConfig,
    settings: DispatchSettings,
    publisher: ProgressPublisher,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn DurableQueue>,
        detector: Arc<dyn Detector>,
        codec: Arc<dyn VideoCodec>,
        counting: CountingConfig,
        settings: DispatchSettings,
    ) -> Self {
        let publisher = ProgressPublisher::new(store.clone(), settings.output_container.clone());
        Self {
            store,
            queue,
            detector,
            codec,
            counting,
            settings,
            publisher,
        }
    }

    /// Poll until `stop` turns true. A job in progress always runs to the end.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        tracing::info!(
            visibility_timeout_secs = self.settings.visibility_timeout.as_secs(),
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "Dispatcher started"
        );

        while !*stop.borrow() {
            match self.poll_once().await {
                Ok(PollOutcome::Idle) => {
                    tracing::trace!("No jobs available, sleeping");
                    if wait_or_stop(&mut stop, self.settings.poll_interval).await {
                        break;
                    }
                }
                Ok(outcome) => {
                    tracing::debug!(?outcome, "Poll finished, checking for next job");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive from queue, will retry");
                    if wait_or_stop(&mut stop, self.settings.poll_interval).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    /// Lease at most one message and handle it.
    ///
    /// Only receive failures are returned as errors; job failures are logged
    /// and reported in the outcome, leaving the lease to expire.
    pub async fn poll_once(&self) -> Result<PollOutcome, QueueError> {
        let Some(message) =
            receive_healing(self.queue.as_ref(), self.settings.visibility_timeout).await?
        else {
            return Ok(PollOutcome::Idle);
        };

        let descriptor = match parse_descriptor(&message.payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::error!(
                    message_id = %message.handle.message_id,
                    error = %e,
                    transient = e.is_transient(),
                    "Rejecting malformed job descriptor; lease left to expire"
                );
                return Ok(PollOutcome::Malformed {
                    message_id: message.handle.message_id,
                });
            }
        };

        Ok(self.dispatch(message, descriptor).await)
    }

    async fn dispatch(&self, message: LeasedMessage, descriptor: JobDescriptor) -> PollOutcome {
        let job_id = descriptor.job_id.clone();
        tracing::info!(
            job_id = %job_id,
            filename = %descriptor.filename,
            message_id = %message.handle.message_id,
            "Processing counting job"
        );

        let started = Instant::now();
        match self.process(&descriptor).await {
            Ok(stats) => {
                metrics::histogram!("job_processing_seconds").record(started.elapsed().as_secs_f64());
                metrics::counter!("jobs_completed_total").increment(1);

                let acked = match self.queue.delete(&message.handle).await {
                    Ok(true) => true,
                    Ok(false) => {
                        tracing::warn!(
                            job_id = %job_id,
                            message_id = %message.handle.message_id,
                            "Lease expired before ack; job may be processed again"
                        );
                        false
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to ack job");
                        false
                    }
                };

                tracing::info!(
                    job_id = %job_id,
                    total_in = stats.total_in,
                    total_out = stats.total_out,
                    total_count = stats.total_count,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
                PollOutcome::Completed {
                    job_id,
                    stats,
                    acked,
                }
            }
            Err(e) => {
                let transient = e.is_transient();
                metrics::counter!("jobs_failed_total", "transient" => transient.to_string())
                    .increment(1);
                tracing::error!(
                    job_id = %job_id,
                    error = %e,
                    transient,
                    "Job processing failed; lease left to expire"
                );
                PollOutcome::Failed { job_id, transient }
            }
        }
    }

    async fn process(&self, descriptor: &JobDescriptor) -> Result<CountStats, JobError> {
        let job_id = &descriptor.job_id;

        tokio::fs::create_dir_all(&self.settings.work_dir).await?;
        let work = tempfile::Builder::new()
            .prefix("herd-job-")
            .tempdir_in(&self.settings.work_dir)?;

        let input_path = work.path().join(&descriptor.filename);
        tracing::debug!(job_id = %job_id, path = %input_path.display(), "Downloading raw video");
        self.store
            .get_to_file(&self.settings.input_container, &descriptor.filename, &input_path)
            .await?;

        self.publisher.publish_progress(job_id, 0).await;

        let info = self.codec.probe(&input_path).await?;
        tracing::info!(
            job_id = %job_id,
            width = info.width,
            height = info.height,
            fps = info.fps,
            total_frames = info.total_frames,
            "Probed video"
        );

        let extension = descriptor
            .extension()
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        let output_key = derive_key(
            job_id,
            ArtifactKind::ProcessedVideo {
                extension: &extension,
            },
        );
        let output_path = work.path().join(format!("processed_{}", output_key));

        let source = self.codec.open(&input_path, &info).await?;
        let sink = self.codec.create(&output_path, &info).await?;
        let engine = CountingEngine::new(self.detector.as_ref(), &self.counting);
        let stats = engine
            .run(source, sink, &info, &self.publisher.for_job(job_id))
            .await?;

        let url = self
            .store
            .put_file(&self.settings.output_container, &output_key, &output_path)
            .await?;
        tracing::info!(job_id = %job_id, url = %url, "Processed video uploaded");

        self.publisher.publish_result(job_id, stats).await;

        if let Err(e) = work.close() {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to remove job work directory");
        }
        Ok(stats)
    }
}

/// Parse and validate a queue payload.
pub fn parse_descriptor(payload: &str) -> Result<JobDescriptor, JobError> {
    let descriptor: JobDescriptor = serde_json::from_str(payload)
        .map_err(|e| JobError::InvalidDescriptor(e.to_string()))?;
    descriptor
        .validate()
        .map_err(|report| JobError::InvalidDescriptor(report.to_string()))?;
    Ok(descriptor)
}

/// Sleep for `interval` unless stopped first. Returns true when stopping.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor_accepts_gateway_payload() {
        let payload = r#"{"job_id":"abc","filename":"abc.mp4","status":"pending"}"#;
        let descriptor = parse_descriptor(payload).unwrap();
        assert_eq!(descriptor.job_id, JobId::from("abc"));
        assert_eq!(descriptor.extension(), Some("mp4"));
    }

    #[test]
    fn test_parse_descriptor_rejects_bad_payloads() {
        for payload in [
            "not json",
            r#"{"job_id":"abc"}"#,
            r#"{"job_id":"","filename":"abc.mp4","status":"pending"}"#,
            r#"{"job_id":"abc","filename":"../etc/passwd","status":"pending"}"#,
            r#"{"job_id":"abc","filename":"dir/abc.mp4","status":"pending"}"#,
        ] {
            let err = parse_descriptor(payload).unwrap_err();
            assert!(matches!(err, JobError::InvalidDescriptor(_)), "{payload}");
            assert!(!err.is_transient());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_or_stop() {
        let (tx, mut rx) = watch::channel(false);
        assert!(!wait_or_stop(&mut rx, Duration::from_secs(5)).await);

        tx.send(true).unwrap();
        assert!(wait_or_stop(&mut rx, Duration::from_secs(3600)).await);

        drop(tx);
        assert!(wait_or_stop(&mut rx, Duration::from_secs(3600)).await);
    }
}
