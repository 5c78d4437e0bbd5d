use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tokio::runtime::Handle;

use crate::models::detection::{BoundingBox, Detection, Frame};
use crate::services::annotate;

/// Frame-level object detector.
///
/// Implementations are synchronous and are only called from blocking
/// threads (the live frame loop and the upload decoder).
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;
}

/// Client for an HTTP object detection service.
///
/// Each frame is JPEG encoded and posted as base64 JSON; the service answers
/// with labeled boxes in pixel coordinates.
pub struct HttpDetector {
    http: Client,
    runtime: Handle,
    url: String,
    api_token: Option<String>,
    min_confidence: f32,
}

#[derive(Deserialize)]
struct DetectResponse {
    detections: Vec<RawDetection>,
}

#[derive(Deserialize)]
struct RawDetection {
    label: String,
    confidence: f32,
    /// `[x1, y1, x2, y2]`
    bbox: [f32; 4],
}

/// JPEG quality for frames sent to the detector.
const UPLOAD_JPEG_QUALITY: u8 = 85;

impl HttpDetector {
    /// Must be called from within a Tokio runtime; requests are driven on it.
    pub fn new(url: String, api_token: Option<String>, min_confidence: f32) -> Self {
        Self {
            http: Client::new(),
            runtime: Handle::current(),
            url,
            api_token,
            min_confidence,
        }
    }

    async fn request(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let jpeg = annotate::encode_jpeg(frame, UPLOAD_JPEG_QUALITY)?;
        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&jpeg),
            "confidence": self.min_confidence,
        });

        let mut request = self.http.post(&self.url).json(&request_body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(DetectError::Http)?
            .error_for_status()
            .map_err(DetectError::Http)?;

        let parsed: DetectResponse = response.json().await.map_err(DetectError::Http)?;
        Ok(parsed
            .detections
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .map(|d| Detection {
                label: d.label,
                confidence: d.confidence,
                bbox: BoundingBox::clamped(d.bbox, frame.width(), frame.height()),
            })
            .filter(|d| !d.bbox.is_empty())
            .collect())
    }
}

impl Detector for HttpDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        self.runtime.block_on(self.request(frame))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Detection request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to encode frame for detection: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Detector failed: {0}")]
    Other(String),
}
