//! Client for the external geospatial compute backend.
//!
//! The backend owns every dataset and performs the heavy raster algebra; this
//! node only holds opaque `dataset_ref` tokens and drives the backend over
//! its JSON API. Reads are idempotent, so bounding boxes are served from a
//! short-lived cache.

use moka::future::Cache as MokaCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::{AnalysisError, Result};
use crate::metrics;
use crate::projection::{GeoBounds, GeoPolygon};

/// Display parameters for rendering a raster (tile or preview).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisParams {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bands: Option<Vec<String>>,
    pub min: f64,
    pub max: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gamma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub palette: Option<Vec<String>>,
}

impl Default for VisParams {
    fn default() -> Self {
        // True-color default used when a layer carries no display settings
        Self {
            bands: Some(vec!["B4".into(), "B3".into(), "B2".into()]),
            min: 0.0,
            max: 0.3,
            gamma: Some(1.4),
            palette: None,
        }
    }
}

/// Outcome of a backend computation: a new dataset plus how to display it.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeResult {
    #[serde(rename = "dataset")]
    pub dataset_ref: String,
    pub tile_url: String,
    #[serde(default)]
    pub bands: Vec<String>,
}

/// Per-band min/max statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandStats {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    message: String,
}

/// Unwrap the backend's `{status, data | error}` envelope.
fn unwrap_envelope(call: &str, envelope: Envelope) -> Result<Value> {
    match envelope.status.as_str() {
        "success" => envelope.data.ok_or_else(|| {
            AnalysisError::Upstream(format!("{}: success without data", call))
        }),
        _ => {
            let message = envelope
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string());
            if message.contains("not found") || message.contains("No value found") {
                Err(AnalysisError::LayerNotFound(message))
            } else {
                Err(AnalysisError::Upstream(format!("{}: {}", call, message)))
            }
        }
    }
}

pub struct GeoBackendClient {
    http: reqwest::Client,
    config: BackendConfig,
    bounds_cache: MokaCache<String, GeoBounds>,
}

impl GeoBackendClient {
    pub fn new(config: BackendConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let bounds_cache = MokaCache::builder()
            .max_capacity(4096)
            .time_to_live(Duration::from_secs(config.read_cache_ttl_secs))
            .build();

        Ok(Self {
            http,
            config,
            bounds_cache,
        })
    }

    async fn post(&self, call: &str, path: &str, body: Value) -> Result<Value> {
        metrics::BACKEND_CALLS.with_label_values(&[call]).inc();
        let timer = metrics::Timer::new();

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Backend call {} failed: {}", call, e);
            AnalysisError::Upstream(format!("{}: {}", call, e))
        })?;

        if !response.status().is_success() {
            return Err(AnalysisError::Upstream(format!(
                "{}: HTTP {}",
                call,
                response.status()
            )));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| AnalysisError::Upstream(format!("{}: malformed response: {}", call, e)))?;

        timer.observe_duration_seconds(&metrics::BACKEND_LATENCY);
        unwrap_envelope(call, envelope)
    }

    /// Geographic bounding box of a dataset. Cached: the backend treats this
    /// as an idempotent read.
    pub async fn bounding_box(&self, dataset_ref: &str) -> Result<GeoBounds> {
        if let Some(bounds) = self.bounds_cache.get(dataset_ref) {
            debug!("Bounding box cache hit for {}", dataset_ref);
            return Ok(bounds);
        }

        let data = self
            .post("bounding_box", "v1/bounds", json!({ "dataset": dataset_ref }))
            .await?;
        let bounds: GeoBounds = serde_json::from_value(data)
            .map_err(|e| AnalysisError::Upstream(format!("bounding_box: {}", e)))?;

        self.bounds_cache
            .insert(dataset_ref.to_string(), bounds)
            .await;
        Ok(bounds)
    }

    /// URL of a bounded-size preview raster for the dataset's bounding box.
    pub async fn preview_url(
        &self,
        dataset_ref: &str,
        vis_params: &VisParams,
        pixel_size: u32,
    ) -> Result<String> {
        let data = self
            .post(
                "preview_url",
                "v1/preview",
                json!({
                    "dataset": dataset_ref,
                    "vis_params": vis_params,
                    "width": pixel_size,
                    "height": pixel_size,
                }),
            )
            .await?;

        data.get("url")
            .and_then(|u| u.as_str())
            .map(|u| u.to_string())
            .ok_or_else(|| AnalysisError::Upstream("preview_url: missing url".to_string()))
    }

    /// Run one named computation over a dataset. The operation itself is
    /// opaque to this node; parameters are forwarded verbatim.
    pub async fn compute(
        &self,
        operation: &str,
        dataset_ref: &str,
        params: Value,
    ) -> Result<ComputeResult> {
        info!("Backend compute {} on {}", operation, dataset_ref);
        let data = self
            .post(
                "compute",
                "v1/compute",
                json!({
                    "op": operation,
                    "dataset": dataset_ref,
                    "params": params,
                }),
            )
            .await?;

        serde_json::from_value(data)
            .map_err(|e| AnalysisError::Upstream(format!("compute {}: {}", operation, e)))
    }

    /// Register a vector dataset built from projected polygon rings.
    pub async fn save_vector(
        &self,
        name: &str,
        rings: &[GeoPolygon],
        style: Value,
    ) -> Result<ComputeResult> {
        info!("Saving vector dataset '{}' with {} rings", name, rings.len());
        let data = self
            .post(
                "save_vector",
                "v1/vector",
                json!({
                    "name": name,
                    "rings": rings,
                    "style": style,
                }),
            )
            .await?;

        serde_json::from_value(data)
            .map_err(|e| AnalysisError::Upstream(format!("save_vector: {}", e)))
    }

    /// Min/max statistics over the given bands of a dataset.
    pub async fn band_stats(&self, dataset_ref: &str, bands: &[String]) -> Result<BandStats> {
        let data = self
            .post(
                "band_stats",
                "v1/stats",
                json!({ "dataset": dataset_ref, "bands": bands }),
            )
            .await?;

        serde_json::from_value(data)
            .map_err(|e| AnalysisError::Upstream(format!("band_stats: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_success_yields_data() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"status": "success", "data": {"dataset": "d-1", "tile_url": "https://tiles/x"}}"#,
        )
        .unwrap();
        let data = unwrap_envelope("compute", envelope).unwrap();
        assert_eq!(data["dataset"], "d-1");
    }

    #[test]
    fn envelope_not_found_maps_to_layer_not_found() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"status": "failure", "error": {"message": "dataset not found: d-9"}}"#,
        )
        .unwrap();
        let err = unwrap_envelope("bounding_box", envelope).unwrap_err();
        assert!(matches!(err, AnalysisError::LayerNotFound(_)));
    }

    #[test]
    fn envelope_failure_maps_to_upstream() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"status": "failure", "error": {"message": "quota exceeded"}}"#,
        )
        .unwrap();
        let err = unwrap_envelope("compute", envelope).unwrap_err();
        assert!(matches!(err, AnalysisError::Upstream(_)));
    }

    #[test]
    fn compute_result_parses_without_bands() {
        let result: ComputeResult =
            serde_json::from_str(r#"{"dataset": "d-2", "tile_url": "https://tiles/y"}"#).unwrap();
        assert_eq!(result.dataset_ref, "d-2");
        assert!(result.bands.is_empty());
    }

    #[test]
    fn default_vis_params_are_true_color() {
        let vis = VisParams::default();
        assert_eq!(vis.bands.as_deref().unwrap(), ["B4", "B3", "B2"]);
        assert_eq!(vis.max, 0.3);
        assert!(vis.palette.is_none());
    }
}
