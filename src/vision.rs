//! Client for the vision segmentation model.
//!
//! The model is an external HTTP collaborator: it takes a preview image URL
//! plus a text prompt or point samples and returns pixel-space detections
//! (bounding boxes and/or binary masks). Stateless per invocation; zero
//! detections is a valid answer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::VisionConfig;
use crate::error::{AnalysisError, Result};
use crate::metrics;
use crate::projection::{DetectionSet, PixelRect};

/// What the model should look for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SegmentPrompt {
    /// Free-text prompt, e.g. "tree" or "building roof"
    Text { prompt: String },
    /// Foreground point samples in preview-pixel coordinates
    Points { points: Vec<[f64; 2]> },
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    width: u32,
    height: u32,
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    /// `[x1, y1, x2, y2]` in pixel coordinates
    #[serde(rename = "box", default)]
    bbox: Option<[f64; 4]>,
    /// Base64-encoded single-channel PNG, non-zero = foreground
    #[serde(default)]
    mask_png: Option<String>,
}

/// Decode the wire detections into raster-space rectangles and masks.
fn decode_detections(response: DetectResponse) -> Result<DetectionSet> {
    let mut set = DetectionSet {
        width: response.width,
        height: response.height,
        ..Default::default()
    };

    for detection in response.detections {
        if let Some([x1, y1, x2, y2]) = detection.bbox {
            set.rects.push(PixelRect { x1, y1, x2, y2 });
        }
        if let Some(encoded) = detection.mask_png {
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| AnalysisError::Upstream(format!("mask decode: {}", e)))?;
            let mask = image::load_from_memory(&bytes)
                .map_err(|e| AnalysisError::Upstream(format!("mask decode: {}", e)))?
                .to_luma8();
            set.masks.push(mask);
        }
    }

    Ok(set)
}

pub struct VisionClient {
    http: reqwest::Client,
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Run one detection pass over a preview image.
    pub async fn detect(&self, image_url: &str, prompt: &SegmentPrompt) -> Result<DetectionSet> {
        metrics::VISION_CALLS.inc();

        let url = format!("{}/v1/detect", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "image_url": image_url,
            "prompt": prompt,
            "box_threshold": self.config.box_threshold,
            "text_threshold": self.config.text_threshold,
        });

        let response = self.http.post(&url).json(&body).send().await.map_err(|e| {
            warn!("Vision model call failed: {}", e);
            AnalysisError::Upstream(format!("detect: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(AnalysisError::Upstream(format!(
                "detect: HTTP {}",
                response.status()
            )));
        }

        let wire: DetectResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Upstream(format!("detect: malformed response: {}", e)))?;

        let set = decode_detections(wire)?;
        info!(
            "Vision model returned {} rects, {} masks for {}x{} image",
            set.rects.len(),
            set.masks.len(),
            set.width,
            set.height
        );
        Ok(set)
    }
}
