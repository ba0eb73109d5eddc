//! Per-job counting: association of detections to tracks, line crossing
//! and frame annotation.

pub mod annotate;
pub mod engine;
pub mod line_zone;
pub mod tracker;

pub use engine::{CountingEngine, CountingSession, ProgressReporter};
pub use line_zone::{CountingLine, CrossingDirection, CrossingEvent, LineZone};
pub use tracker::{Association, Track, Tracker};

use crate::media::MediaError;
use crate::services::detector::DetectorError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Counting line endpoints must differ")]
    DegenerateLine,

    #[error("Detection failed: {0}")]
    Detector(#[from] DetectorError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}
