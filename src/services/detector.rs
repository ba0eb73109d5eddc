use std::io::Cursor;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::media::Frame;
use crate::models::detection::{BoundingBox, Detection};

/// Maps one frame to the objects visible in it.
///
/// Implementations are built once per process and shared across jobs; they
/// must not keep per-job state.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Client for object detection models served by Cloudflare Workers AI.
pub struct WorkersAiDetector {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
    confidence_threshold: f32,
    jpeg_quality: u8,
}

#[derive(Serialize)]
struct DetectRequest {
    image: Vec<u8>,
}

#[derive(Deserialize)]
struct DetectResponse {
    success: bool,
    #[serde(default)]
    result: Vec<DetectObject>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Deserialize)]
struct DetectObject {
    score: f32,
    label: String,
    #[serde(rename = "box")]
    bbox: DetectBox,
}

#[derive(Deserialize)]
struct DetectBox {
    xmin: f32,
    ymin: f32,
    xmax: f32,
    ymax: f32,
}

impl WorkersAiDetector {
    pub fn new(account_id: String, api_token: String, model: String) -> Self {
        Self {
            http: Client::new(),
            account_id,
            api_token,
            model,
            confidence_threshold: 0.4,
            jpeg_quality: 85,
        }
    }

    /// Override the confidence threshold applied to model output.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, self.model
        )
    }

    fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>, DetectorError> {
        let mut buffer = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality);
        frame.image.write_with_encoder(encoder)?;
        Ok(buffer.into_inner())
    }

    fn into_detections(&self, objects: Vec<DetectObject>) -> Vec<Detection> {
        objects
            .into_iter()
            .filter(|object| object.score >= self.confidence_threshold)
            .map(|object| {
                Detection::new(
                    object.label,
                    object.score,
                    BoundingBox::new(
                        object.bbox.xmin,
                        object.bbox.ymin,
                        object.bbox.xmax,
                        object.bbox.ymax,
                    ),
                )
            })
            .collect()
    }
}

#[async_trait]
impl Detector for WorkersAiDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let request_body = DetectRequest {
            image: self.encode_jpeg(frame)?,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await
            .map_err(DetectorError::Http)?
            .error_for_status()
            .map_err(DetectorError::Http)?;

        let body: DetectResponse = response.json().await.map_err(DetectorError::Http)?;
        if !body.success {
            let message = body
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DetectorError::Api(message));
        }

        Ok(self.into_detections(body.result))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Workers AI rejected the request: {0}")]
    Api(String),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}
