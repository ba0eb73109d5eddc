use std::path::PathBuf;
use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Queue name; all Redis keys of the queue share this prefix
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// S3-compatible bucket holding every container
    pub s3_bucket: String,

    /// S3 endpoint URL (R2, MinIO or AWS)
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// S3 access key ID
    pub s3_access_key: String,

    /// S3 secret access key
    pub s3_secret_key: String,

    /// Container receiving raw uploads
    #[serde(default = "default_input_container")]
    pub input_container: String,

    /// Container receiving processed videos, status snapshots and results
    #[serde(default = "default_output_container")]
    pub output_container: String,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Lease duration for a received job; must exceed worst-case processing time
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Wait after an empty poll
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Parent directory for per-job temporary files (system temp dir when unset)
    pub work_dir: Option<PathBuf>,

    /// Cloudflare account ID (worker only)
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token (worker only)
    pub cf_api_token: Option<String>,

    /// Workers AI object detection model
    #[serde(default = "default_detector_model")]
    pub detector_model: String,

    /// Detections below this confidence are dropped by the detector
    #[serde(default = "default_detector_confidence")]
    pub detector_confidence: f32,

    /// Address for the worker's Prometheus listener; disabled when unset
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_queue_name() -> String {
    "video-processing-queue".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_input_container() -> String {
    "raw-videos".to_string()
}

fn default_output_container() -> String {
    "processed-videos".to_string()
}

fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024 * 1024
}

fn default_visibility_timeout_secs() -> u64 {
    900
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_detector_model() -> String {
    "@cf/facebook/detr-resnet-50".to_string()
}

fn default_detector_confidence() -> f32 {
    0.4
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Which sign flip of the line side counts as an "in" crossing.
///
/// The side of a point is the sign of the cross product of the line direction
/// (start to end) with the vector from the line start to the point. With the
/// default horizontal line drawn left to right, positive is below the line
/// in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InDirection {
    NegativeToPositive,
    PositiveToNegative,
}

/// Box point tested against the counting line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    Center,
    BottomCenter,
}

/// Tracking and line-counting parameters, read from `COUNTER_*` variables.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CountingConfig {
    /// Class labels that are tracked and counted
    #[serde(default = "default_target_classes")]
    #[garde(length(min = 1))]
    pub target_classes: Vec<String>,

    /// Boxes must be strictly larger than this (px²)
    #[serde(default = "default_min_box_area")]
    #[garde(range(min = 0.0))]
    pub min_box_area: f32,

    /// Detections at or above this confidence take part in the first matching pass
    #[serde(default = "default_high_confidence")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub high_confidence: f32,

    /// IoU threshold of the first (strict) matching pass
    #[serde(default = "default_strict_iou")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub strict_iou: f32,

    /// IoU threshold of the second (relaxed) matching pass
    #[serde(default = "default_relaxed_iou")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub relaxed_iou: f32,

    /// Unmatched detections below this confidence do not start a track
    #[serde(default = "default_activation_confidence")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub activation_confidence: f32,

    /// Frames a track survives without a match
    #[serde(default = "default_lost_track_budget")]
    #[garde(skip)]
    pub lost_track_budget: u32,

    /// Line endpoints, normalized to the frame size
    #[serde(default)]
    #[garde(range(min = 0.0, max = 1.0))]
    pub line_start_x: f32,
    #[serde(default = "default_line_y")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub line_start_y: f32,
    #[serde(default = "default_line_end_x")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub line_end_x: f32,
    #[serde(default = "default_line_y")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub line_end_y: f32,

    #[serde(default = "default_in_direction")]
    #[garde(skip)]
    pub in_direction: InDirection,

    #[serde(default = "default_anchor")]
    #[garde(skip)]
    pub anchor: Anchor,

    /// Progress is reported every this many frames
    #[serde(default = "default_progress_every_frames")]
    #[garde(range(min = 1))]
    pub progress_every_frames: u64,

    /// Trail length drawn behind each track
    #[serde(default = "default_trace_length")]
    #[garde(skip)]
    pub trace_length: usize,
}

fn default_target_classes() -> Vec<String> {
    ["bird", "sheep", "cow", "bear", "dog", "horse", "zebra"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_min_box_area() -> f32 {
    4000.0
}

fn default_high_confidence() -> f32 {
    0.5
}

fn default_strict_iou() -> f32 {
    0.3
}

fn default_relaxed_iou() -> f32 {
    0.15
}

fn default_activation_confidence() -> f32 {
    0.25
}

fn default_lost_track_budget() -> u32 {
    30
}

fn default_line_y() -> f32 {
    0.5
}

fn default_line_end_x() -> f32 {
    1.0
}

fn default_in_direction() -> InDirection {
    InDirection::NegativeToPositive
}

fn default_anchor() -> Anchor {
    Anchor::Center
}

fn default_progress_every_frames() -> u64 {
    30
}

fn default_trace_length() -> usize {
    50
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            target_classes: default_target_classes(),
            min_box_area: default_min_box_area(),
            high_confidence: default_high_confidence(),
            strict_iou: default_strict_iou(),
            relaxed_iou: default_relaxed_iou(),
            activation_confidence: default_activation_confidence(),
            lost_track_budget: default_lost_track_budget(),
            line_start_x: 0.0,
            line_start_y: default_line_y(),
            line_end_x: default_line_end_x(),
            line_end_y: default_line_y(),
            in_direction: default_in_direction(),
            anchor: default_anchor(),
            progress_every_frames: default_progress_every_frames(),
            trace_length: default_trace_length(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CountingConfigError {
    #[error("Failed to read COUNTER_* variables: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid counting configuration: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Counting line start and end coincide")]
    DegenerateLine,

    #[error("relaxed_iou ({relaxed}) must not exceed strict_iou ({strict})")]
    IouOrder { strict: f32, relaxed: f32 },
}

impl CountingConfig {
    pub fn from_env() -> Result<Self, CountingConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::prefixed("COUNTER_").from_env()?;
        config.check()?;
        Ok(config)
    }

    /// Field ranges plus the rules that span several fields.
    pub fn check(&self) -> Result<(), CountingConfigError> {
        self.validate()?;
        if self.line_start_x == self.line_end_x && self.line_start_y == self.line_end_y {
            return Err(CountingConfigError::DegenerateLine);
        }
        if self.relaxed_iou > self.strict_iou {
            return Err(CountingConfigError::IouOrder {
                strict: self.strict_iou,
                relaxed: self.relaxed_iou,
            });
        }
        Ok(())
    }
}
