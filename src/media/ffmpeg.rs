//! rgb24 frame pipes over ffmpeg subprocesses.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbImage;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::media::probe::{probe_video, VideoInfo};
use crate::media::{frame_len, Frame, FrameSink, FrameSource, MediaError, VideoCodec, PIXEL_FORMAT};

/// Lines of ffmpeg stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Production codec backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    ffmpeg: PathBuf,
}

impl Default for FfmpegCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegCodec {
    pub fn new() -> Self {
        Self::with_ffmpeg("ffmpeg")
    }

    /// Use a specific ffmpeg executable instead of the one on PATH.
    pub fn with_ffmpeg(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    fn ensure_ffmpeg(&self) -> Result<(), MediaError> {
        which::which(&self.ffmpeg)
            .map(|_| ())
            .map_err(|_| MediaError::BinaryNotFound("ffmpeg"))
    }
}

#[async_trait]
impl VideoCodec for FfmpegCodec {
    async fn probe(&self, path: &Path) -> Result<VideoInfo, MediaError> {
        probe_video(path).await
    }

    async fn open(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSource>, MediaError> {
        self.ensure_ffmpeg()?;
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", PIXEL_FORMAT, "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::InvalidVideo("ffmpeg stdout unavailable".to_string()))?;
        let stderr = StderrTail::spawn(&mut child);

        Ok(Box::new(FfmpegFrameReader {
            child,
            stdout,
            stderr,
            width: info.width,
            height: info.height,
            next_index: 0,
        }))
    }

    async fn create(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>, MediaError> {
        self.ensure_ffmpeg()?;
        let size = format!("{}x{}", info.width, info.height);
        let rate = format!("{:.3}", info.fps);

        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", PIXEL_FORMAT])
            .args(["-s", &size, "-r", &rate, "-i", "-"])
            .args(["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"]);

        let is_mov_family = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4") || ext.eq_ignore_ascii_case("mov"));
        if is_mov_family {
            command.args(["-movflags", "+faststart"]);
        }

        let mut child = command
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::InvalidVideo("ffmpeg stdin unavailable".to_string()))?;
        let stderr = StderrTail::spawn(&mut child);

        Ok(Box::new(FfmpegFrameWriter {
            child,
            stdin: Some(stdin),
            stderr,
            width: info.width,
            height: info.height,
        }))
    }
}

/// Decodes frames from an ffmpeg rawvideo pipe.
pub struct FfmpegFrameReader {
    child: Child,
    stdout: ChildStdout,
    stderr: StderrTail,
    width: u32,
    height: u32,
    next_index: u64,
}

#[async_trait]
impl FrameSource for FfmpegFrameReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        let expected = frame_len(self.width, self.height);
        let mut buffer = vec![0u8; expected];
        let filled = read_full(&mut self.stdout, &mut buffer).await?;

        if filled == 0 {
            let status = self.child.wait().await?;
            if !status.success() {
                let stderr = self.stderr.collect().await;
                return Err(MediaError::ProcessFailed {
                    tool: "ffmpeg",
                    stderr,
                });
            }
            return Ok(None);
        }
        if filled < expected {
            return Err(MediaError::TruncatedFrame {
                expected,
                actual: filled,
            });
        }

        let image = RgbImage::from_raw(self.width, self.height, buffer).ok_or(
            MediaError::TruncatedFrame {
                expected,
                actual: filled,
            },
        )?;
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }
}

/// Encodes frames through an ffmpeg rawvideo pipe.
pub struct FfmpegFrameWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: StderrTail,
    width: u32,
    height: u32,
}

#[async_trait]
impl FrameSink for FfmpegFrameWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(MediaError::FrameSize {
                width: self.width,
                height: self.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::InvalidVideo("encoder already finished".to_string()))?;
        stdin.write_all(frame.image.as_raw()).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), MediaError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        let status = self.child.wait().await?;
        if !status.success() {
            let stderr = self.stderr.collect().await;
            return Err(MediaError::ProcessFailed {
                tool: "ffmpeg",
                stderr,
            });
        }
        Ok(())
    }
}

/// Read until `buffer` is full or the stream ends; returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads a child's stderr as it arrives so a chatty ffmpeg never blocks on
/// a full pipe. Only the last lines are kept.
struct StderrTail {
    handle: Option<JoinHandle<String>>,
}

impl StderrTail {
    fn spawn(child: &mut Child) -> Self {
        let handle = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = Vec::new();
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(String::from_utf8_lossy(&line).trim_end().to_string());
                        }
                    }
                }
                Vec::from(tail).join("\n")
            })
        });
        Self { handle }
    }

    /// Wait for stderr to close and return the kept lines.
    async fn collect(&mut self) -> String {
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}
