//! Test helper utilities: scripted detector, synthetic codec and an
//! in-memory dispatch harness, plus HTTP helpers for E2E runs.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tokio::time::sleep;

use herd_counter::config::{AppConfig, CountingConfig};
use herd_counter::media::{Frame, FrameSink, FrameSource, MediaError, VideoCodec, VideoInfo};
use herd_counter::models::detection::Detection;
use herd_counter::models::job::{JobStatus, ResultRecord, StatusSnapshot};
use herd_counter::models::submission::SubmitResponse;
use herd_counter::services::detector::{Detector, DetectorError};
use herd_counter::services::memory::{MemoryArtifactStore, MemoryQueue};
use herd_counter::services::storage::ArtifactStore;
use herd_counter::tracking::engine::ProgressReporter;
use herd_counter::worker::{DispatchSettings, Dispatcher};

use crate::fixtures::{Scenario, FRAME_HEIGHT, FRAME_WIDTH};

pub const INPUT_CONTAINER: &str = "raw-videos";
pub const OUTPUT_CONTAINER: &str = "processed-videos";
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(900);

/// Detector replaying fixed detections by frame index.
pub struct ScriptedDetector {
    frames: Vec<Vec<Detection>>,
    fail_once_at: Option<u64>,
    failed: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            frames: scenario.frames.clone(),
            fail_once_at: None,
            failed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the first time `frame_index` is seen, then behave normally.
    pub fn failing_once_at(mut self, frame_index: u64) -> Self {
        self.fail_once_at = Some(frame_index);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_once_at == Some(frame.index) && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(DetectorError::Api("scripted outage".to_string()));
        }
        Ok(self
            .frames
            .get(frame.index as usize)
            .cloned()
            .unwrap_or_default())
    }
}

/// Codec producing blank frames and recording what gets encoded.
pub struct SyntheticCodec {
    info: VideoInfo,
    frames: u64,
    written: Arc<Mutex<Vec<u64>>>,
    unreadable: bool,
}

impl SyntheticCodec {
    /// A clip with `frames` frames whose container reports the same count.
    pub fn new(frames: u64) -> Self {
        Self::with_reported_frames(frames, frames)
    }

    /// A clip whose container reports `reported` frames but decodes `frames`.
    pub fn with_reported_frames(frames: u64, reported: u64) -> Self {
        Self {
            info: VideoInfo {
                width: FRAME_WIDTH,
                height: FRAME_HEIGHT,
                fps: 30.0,
                total_frames: reported,
            },
            frames,
            written: Arc::new(Mutex::new(Vec::new())),
            unreadable: false,
        }
    }

    /// A codec that rejects every clip as undecodable.
    pub fn unreadable() -> Self {
        Self {
            unreadable: true,
            ..Self::new(0)
        }
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    /// Indices of every frame written to any sink, in write order.
    pub fn written(&self) -> Vec<u64> {
        self.written.lock().unwrap().clone()
    }

    pub fn source(&self) -> Box<dyn FrameSource> {
        Box::new(BlankSource {
            next: 0,
            frames: self.frames,
            info: self.info,
        })
    }

    pub fn sink(&self, path: &Path) -> Box<dyn FrameSink> {
        Box::new(RecordingSink {
            path: path.to_path_buf(),
            written: self.written.clone(),
            count: 0,
        })
    }
}

#[async_trait]
impl VideoCodec for SyntheticCodec {
    async fn probe(&self, path: &Path) -> Result<VideoInfo, MediaError> {
        if tokio::fs::metadata(path).await.is_err() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        if self.unreadable {
            return Err(MediaError::InvalidVideo("no video stream".to_string()));
        }
        Ok(self.info)
    }

    async fn open(&self, _path: &Path, _info: &VideoInfo) -> Result<Box<dyn FrameSource>, MediaError> {
        Ok(self.source())
    }

    async fn create(&self, path: &Path, _info: &VideoInfo) -> Result<Box<dyn FrameSink>, MediaError> {
        Ok(self.sink(path))
    }
}

struct BlankSource {
    next: u64,
    frames: u64,
    info: VideoInfo,
}

#[async_trait]
impl FrameSource for BlankSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        if self.next >= self.frames {
            return Ok(None);
        }
        let frame = Frame::blank(self.next, self.info.width, self.info.height);
        self.next += 1;
        Ok(Some(frame))
    }
}

struct RecordingSink {
    path: PathBuf,
    written: Arc<Mutex<Vec<u64>>>,
    count: u64,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        self.written.lock().unwrap().push(frame.index);
        self.count += 1;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), MediaError> {
        tokio::fs::write(&self.path, format!("synthetic video, {} frames", self.count)).await?;
        Ok(())
    }
}

/// Progress reporter that keeps every value it was given.
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<u8>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<u8> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn report(&self, percent: u8) {
        self.reports.lock().unwrap().push(percent);
    }
}

/// Dispatcher wired to in-memory storage and queue.
pub struct Harness {
    pub store: Arc<MemoryArtifactStore>,
    pub queue: Arc<MemoryQueue>,
    pub detector: Arc<ScriptedDetector>,
    pub codec: Arc<SyntheticCodec>,
    pub dispatcher: Dispatcher,
    pub work_dir: TempDir,
}

pub fn harness(detector: ScriptedDetector, codec: SyntheticCodec) -> Harness {
    harness_with_config(detector, codec, CountingConfig::default())
}

pub fn harness_with_config(
    detector: ScriptedDetector,
    codec: SyntheticCodec,
    counting: CountingConfig,
) -> Harness {
    let store = Arc::new(MemoryArtifactStore::new());
    let queue = Arc::new(MemoryQueue::created());
    let detector = Arc::new(detector);
    let codec = Arc::new(codec);
    let work_dir = tempfile::tempdir().expect("Failed to create work dir");

    let settings = DispatchSettings {
        input_container: INPUT_CONTAINER.to_string(),
        output_container: OUTPUT_CONTAINER.to_string(),
        visibility_timeout: VISIBILITY_TIMEOUT,
        poll_interval: Duration::from_secs(5),
        work_dir: work_dir.path().to_path_buf(),
    };

    let dispatcher = Dispatcher::new(
        store.clone(),
        queue.clone(),
        detector.clone(),
        codec.clone(),
        counting,
        settings,
    );

    Harness {
        store,
        queue,
        detector,
        codec,
        dispatcher,
        work_dir,
    }
}

/// Read and parse a JSON artifact from the output container.
pub async fn read_output<T: DeserializeOwned>(store: &MemoryArtifactStore, key: &str) -> Option<T> {
    let bytes = store.get(OUTPUT_CONTAINER, key).await.ok()?;
    Some(serde_json::from_slice(&bytes).expect("Artifact is not valid JSON"))
}

/// Gateway configuration as it would come from a minimal environment.
pub fn test_app_config() -> AppConfig {
    let vars = [
        ("REDIS_URL", "redis://127.0.0.1:6379"),
        ("S3_BUCKET", "herd-counter-test"),
        ("S3_ENDPOINT", "http://127.0.0.1:9000"),
        ("S3_ACCESS_KEY", "minio"),
        ("S3_SECRET_KEY", "minio123"),
    ];
    envy::from_iter(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
        .expect("Test configuration should deserialize")
}

/// Get base URL from env or default to localhost
pub fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// Upload a clip to the submit endpoint
pub async fn upload_clip(
    client: &reqwest::Client,
    base_url: &str,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("video/mp4")?,
    );

    let response = client
        .post(format!("{}/submit-job", base_url))
        .multipart(form)
        .send()
        .await?;
    Ok(response)
}

/// Submit a clip and parse the accepted response
pub async fn submit_clip(
    client: &reqwest::Client,
    base_url: &str,
    path: &Path,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or("Clip path has no file name")?;
    let response = upload_clip(client, base_url, filename, bytes).await?;
    if !response.status().is_success() {
        return Err(format!("Submit failed with status {}", response.status()).into());
    }
    Ok(response.json().await?)
}

/// Poll the status endpoint until the job completes, collecting snapshots
pub async fn wait_for_completion(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    timeout: Duration,
) -> Result<Vec<StatusSnapshot>, Box<dyn std::error::Error>> {
    let deadline = std::time::Instant::now() + timeout;
    let mut seen = Vec::new();

    while std::time::Instant::now() < deadline {
        let response = client
            .get(format!("{}/jobs/{}/status", base_url, job_id))
            .send()
            .await?;
        if response.status().is_success() {
            let snapshot: StatusSnapshot = response.json().await?;
            let done = snapshot.status == JobStatus::Completed;
            seen.push(snapshot);
            if done {
                return Ok(seen);
            }
        }
        sleep(Duration::from_secs(2)).await;
    }

    Err(format!("Job {} did not complete within {:?}", job_id, timeout).into())
}

/// Fetch the final result record
pub async fn fetch_result(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
) -> Result<ResultRecord, Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{}/jobs/{}/result", base_url, job_id))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}
