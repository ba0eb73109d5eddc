//! Video decoding and encoding.
//!
//! The worker talks to clips through [`VideoCodec`]; the production codec
//! drives `ffprobe`/`ffmpeg` subprocesses over rgb24 pipes.

pub mod ffmpeg;
pub mod probe;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbImage;

pub use ffmpeg::FfmpegCodec;
pub use probe::VideoInfo;

/// One decoded frame. `index` counts from 0 in decode order.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Black frame of the given size.
    pub fn blank(index: u64, width: u32, height: u32) -> Self {
        Self::new(index, RgbImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Sequential frame decoder.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>, MediaError>;
}

/// Sequential frame encoder.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError>;

    /// Flush and close the output. Must be called once after the last frame.
    async fn finish(self: Box<Self>) -> Result<(), MediaError>;
}

/// Opens clips for decoding and creates encoders for annotated output.
#[async_trait]
pub trait VideoCodec: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<VideoInfo, MediaError>;

    async fn open(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSource>, MediaError>;

    async fn create(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>, MediaError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{0} binary not found in PATH")]
    BinaryNotFound(&'static str),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video: {0}")]
    InvalidVideo(String),

    #[error("{tool} failed: {stderr}")]
    ProcessFailed { tool: &'static str, stderr: String },

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    #[error("Frame size {actual_width}x{actual_height} does not match stream {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse ffprobe output: {0}")]
    Probe(#[from] serde_json::Error),
}

/// Pixel format exchanged with ffmpeg.
pub(crate) const PIXEL_FORMAT: &str = "rgb24";

pub(crate) fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}
