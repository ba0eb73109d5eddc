//! FFprobe stream information.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::media::MediaError;

/// Properties of the first video stream of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame count; 0 when neither the container nor the duration tells us.
    pub total_frames: u64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: Option<FfprobeTags>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Display rotation in degrees, from the display matrix or the legacy tag.
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse().ok())
            })
            .unwrap_or(0.0)
    }
}

/// Probe a clip with ffprobe.
pub async fn probe_video(path: &Path) -> Result<VideoInfo, MediaError> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::BinaryNotFound("ffprobe"))?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ProcessFailed {
            tool: "ffprobe",
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> Result<VideoInfo, MediaError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::InvalidVideo("Video stream has no dimensions".to_string())),
    };
    // ffmpeg autorotates while decoding, so quarter turns swap the frame size
    let quarter_turns = (stream.rotation() / 90.0).round() as i64;
    let (width, height) = if quarter_turns.rem_euclid(2) == 1 {
        (height, width)
    } else {
        (width, height)
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| duration.map(|d| (d * fps).round() as u64))
        .unwrap_or(0);

    Ok(VideoInfo {
        width,
        height,
        fps,
        total_frames,
    })
}

/// Parse an ffprobe rational such as "30000/1001".
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };
    (value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
    }

    #[test]
    fn test_probe_prefers_nb_frames() {
        let info = parse_probe_output(
            br#"{"format":{"duration":"10.0"},"streams":[
                {"codec_type":"audio"},
                {"codec_type":"video","width":1280,"height":720,
                 "avg_frame_rate":"25/1","nb_frames":"251"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            info,
            VideoInfo {
                width: 1280,
                height: 720,
                fps: 25.0,
                total_frames: 251
            }
        );
    }

    #[test]
    fn test_probe_falls_back_to_duration() {
        let info = parse_probe_output(
            br#"{"format":{"duration":"4.0"},"streams":[
                {"codec_type":"video","width":640,"height":480,"r_frame_rate":"30/1"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(info.total_frames, 120);
    }

    #[test]
    fn test_probe_swaps_dimensions_for_portrait_rotation() {
        let info = parse_probe_output(
            br#"{"streams":[
                {"codec_type":"video","width":1920,"height":1080,"avg_frame_rate":"30/1",
                 "nb_frames":"300",
                 "side_data_list":[{"side_data_type":"Display Matrix","rotation":-90}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));

        let tagged = parse_probe_output(
            br#"{"streams":[
                {"codec_type":"video","width":1920,"height":1080,"tags":{"rotate":"270"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!((tagged.width, tagged.height), (1080, 1920));

        let upside_down = parse_probe_output(
            br#"{"streams":[
                {"codec_type":"video","width":1920,"height":1080,
                 "side_data_list":[{"side_data_type":"Display Matrix","rotation":180}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!((upside_down.width, upside_down.height), (1920, 1080));
    }

    #[test]
    fn test_probe_without_video_stream() {
        let err = parse_probe_output(br#"{"streams":[{"codec_type":"audio"}]}"#).unwrap_err();
        assert!(matches!(err, MediaError::InvalidVideo(_)));
    }
}
