//! Analysis operation adapters.
//!
//! One adapter per analysis kind, each executed once per requested layer by
//! the dispatcher. Adapters receive an immutable parameter snapshot resolved
//! at the batch boundary and return an explicit `Result`; no failure ever
//! crosses a worker boundary as a panic.
//!
//! The remote-sensing algorithms themselves (band math, classifier training,
//! clustering, terrain derivation) are opaque backend computations; the AI
//! segmentation adapter additionally drives the vision model and the
//! geo-projector.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatcher::{self, WorkItem};
use crate::error::{AnalysisError, Result};
use crate::geo_backend::GeoBackendClient;
use crate::layer_store::{LayerHandle, LayerKind, LayerStore};
use crate::projection;
use crate::response::{aggregate, AggregatedResponse, LayerResult};
use crate::samples::{SampleGeometry, SampleStore};
use crate::vision::{SegmentPrompt, VisionClient};

lazy_static! {
    /// Characters allowed in names handed to the backend.
    static ref NAME_SANITIZER: Regex = Regex::new(r"[^A-Za-z0-9._ -]").unwrap();
}

/// Style applied to every vector layer produced from segmentation output.
const SEGMENT_STYLE: &str = r##"{"color": "#FF4136", "weight": 2, "fillOpacity": 0.35}"##;

fn sanitize_name(name: &str) -> String {
    let cleaned = NAME_SANITIZER.replace_all(name, "_");
    cleaned.chars().take(100).collect()
}

/// Spectral index kinds the backend knows how to derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Ndvi,
    Ndwi,
    Ndbi,
    Evi,
    Savi,
    Mndwi,
    Bsi,
}

impl IndexKind {
    pub fn band_name(&self) -> &'static str {
        match self {
            IndexKind::Ndvi => "NDVI",
            IndexKind::Ndwi => "NDWI",
            IndexKind::Ndbi => "NDBI",
            IndexKind::Evi => "EVI",
            IndexKind::Savi => "SAVI",
            IndexKind::Mndwi => "MNDWI",
            IndexKind::Bsi => "BSI",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Ndvi => "ndvi",
            IndexKind::Ndwi => "ndwi",
            IndexKind::Ndbi => "ndbi",
            IndexKind::Evi => "evi",
            IndexKind::Savi => "savi",
            IndexKind::Mndwi => "mndwi",
            IndexKind::Bsi => "bsi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    RandomForest,
    Svm,
}

/// Semantic band roles resolved per satellite family. Sensors disagree on
/// which physical band carries which wavelength, so index math is expressed
/// in roles and mapped here.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BandMapping {
    pub blue: &'static str,
    pub green: &'static str,
    pub red: &'static str,
    pub nir: &'static str,
    pub swir1: &'static str,
    pub swir2: &'static str,
}

const LANDSAT_89: BandMapping = BandMapping {
    blue: "B2",
    green: "B3",
    red: "B4",
    nir: "B5",
    swir1: "B6",
    swir2: "B7",
};

const LANDSAT_57: BandMapping = BandMapping {
    blue: "B1",
    green: "B2",
    red: "B3",
    nir: "B4",
    swir1: "B5",
    swir2: "B7",
};

const SENTINEL_2: BandMapping = BandMapping {
    blue: "B2",
    green: "B3",
    red: "B4",
    nir: "B8",
    swir1: "B11",
    swir2: "B12",
};

/// Resolve the band mapping from the satellite tag embedded in the layer id
/// (e.g. `layer-3-LANDSAT-8`). Unknown tags fall back to Landsat 8/9.
pub fn band_mapping_for(layer_id: &str) -> BandMapping {
    let upper = layer_id.to_uppercase();
    if upper.contains("SENTINEL-2") {
        SENTINEL_2
    } else if upper.contains("LANDSAT-5") || upper.contains("LANDSAT-7") {
        LANDSAT_57
    } else {
        LANDSAT_89
    }
}

/// One class worth of training data, snapshotted for classification workers.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingClass {
    pub class_index: usize,
    pub class_name: String,
    pub geometry: SampleGeometry,
    pub features: Vec<Value>,
}

/// A batch operation with its validated parameters: one variant per analysis
/// kind, built at the request boundary, never a duck-typed bag.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    CloudRemoval,
    ImageFilling,
    HistogramEqualization,
    CalculateIndex {
        index: IndexKind,
    },
    KmeansClustering {
        cluster_counts: HashMap<String, u32>,
    },
    SupervisedClassification {
        classifier: ClassifierKind,
        num_trees: u32,
        kernel: Option<String>,
        train_ratio: f64,
    },
    TerrainAnalysis,
    RasterCalculator {
        expression: String,
    },
    Segment {
        prompt: SegmentPrompt,
    },
}

impl BatchOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BatchOperation::CloudRemoval => "cloud_removal",
            BatchOperation::ImageFilling => "image_filling",
            BatchOperation::HistogramEqualization => "histogram_equalization",
            BatchOperation::CalculateIndex { .. } => "calculate_index",
            BatchOperation::KmeansClustering { .. } => "kmeans_clustering",
            BatchOperation::SupervisedClassification { .. } => "supervised_classification",
            BatchOperation::TerrainAnalysis => "terrain_analysis",
            BatchOperation::RasterCalculator { .. } => "raster_calculator",
            BatchOperation::Segment { .. } => "segment",
        }
    }

    pub fn success_message(&self) -> String {
        match self {
            BatchOperation::CloudRemoval => "Cloud removal completed".to_string(),
            BatchOperation::ImageFilling => "Image filling completed".to_string(),
            BatchOperation::HistogramEqualization => {
                "Histogram equalization completed".to_string()
            }
            BatchOperation::CalculateIndex { index } => {
                format!("Added {} band", index.band_name())
            }
            BatchOperation::KmeansClustering { .. } => "K-means clustering completed".to_string(),
            BatchOperation::SupervisedClassification { .. } => {
                "Supervised classification completed".to_string()
            }
            BatchOperation::TerrainAnalysis => "Terrain analysis completed".to_string(),
            BatchOperation::RasterCalculator { .. } => "Expression evaluated".to_string(),
            BatchOperation::Segment { .. } => "Segmentation completed".to_string(),
        }
    }
}

/// Immutable per-item snapshot handed to a worker: the operation, the item's
/// display override, and (for classification) the frozen training set.
/// Workers never see a live reference to mutable shared state.
#[derive(Clone)]
pub struct ItemSnapshot {
    op: Arc<BatchOperation>,
    vis: Option<Value>,
    samples: Arc<Vec<TrainingClass>>,
}

/// Shared handles every adapter needs. Cloned into the axum state.
pub struct AnalysisContext {
    pub store: Arc<LayerStore>,
    pub samples: Arc<SampleStore>,
    pub backend: Arc<GeoBackendClient>,
    pub vision: Arc<VisionClient>,
    pub config: Arc<Config>,
}

impl AnalysisContext {
    fn fetch_handle(&self, layer_id: &str) -> Result<LayerHandle> {
        self.store
            .get(layer_id)
            .ok_or_else(|| AnalysisError::LayerNotFound(layer_id.to_string()))
    }

    /// In-place raster ops: the layer's dataset is replaced by the derived
    /// one, matching how preprocessing rewrites a layer.
    async fn run_in_place(
        &self,
        backend_op: &str,
        layer_id: &str,
        vis: Option<Value>,
        params: Value,
    ) -> Result<LayerResult> {
        let handle = self.fetch_handle(layer_id)?;
        let vis = vis.or_else(|| handle.vis_params.clone());

        let mut body = params;
        if let Some(vis_value) = &vis {
            body["vis_params"] = vis_value.clone();
        }

        let result = self.backend.compute(backend_op, &handle.dataset_ref, body).await?;

        let mut updated = handle;
        updated.dataset_ref = result.dataset_ref;
        updated.tile_url = result.tile_url.clone();
        if !result.bands.is_empty() {
            updated.band_info = result.bands.clone();
        }
        updated.vis_params = vis.clone();
        updated.touch();
        let band_info = updated.band_info.clone();
        self.store.save(updated);

        Ok(LayerResult {
            layer_id: layer_id.to_string(),
            name: None,
            tile_url: result.tile_url,
            band_info,
            vis_params: vis,
            source_layer_id: None,
            polygon_count: None,
        })
    }

    /// Derived-layer ops: the computation lands in a new layer registered
    /// next to its source.
    async fn run_derived(
        &self,
        backend_op: &str,
        layer_id: &str,
        suffix: &str,
        name_suffix: &str,
        band_info: Vec<String>,
        vis: Value,
        params: Value,
    ) -> Result<LayerResult> {
        let handle = self.fetch_handle(layer_id)?;
        let result = self.backend.compute(backend_op, &handle.dataset_ref, params).await?;

        let derived_id = format!("{}_{}", layer_id, suffix);
        let derived_name = format!("{} {}", handle.name, name_suffix);
        let bands = if result.bands.is_empty() {
            band_info
        } else {
            result.bands.clone()
        };

        let mut derived = LayerHandle::new(
            derived_id.clone(),
            derived_name.clone(),
            LayerKind::Raster,
            result.dataset_ref,
        );
        derived.tile_url = result.tile_url.clone();
        derived.band_info = bands.clone();
        derived.vis_params = Some(vis.clone());
        self.store.save(derived);

        Ok(LayerResult {
            layer_id: derived_id,
            name: Some(derived_name),
            tile_url: result.tile_url,
            band_info: bands,
            vis_params: Some(vis),
            source_layer_id: Some(layer_id.to_string()),
            polygon_count: None,
        })
    }

    /// AI segmentation: preview the layer, run the vision model, project the
    /// detections into geographic rings, and register the vector result.
    /// Stages run fetch -> preview -> detect -> project -> save; any stage's
    /// failure fails this item only, with no retry.
    async fn run_segment(&self, layer_id: &str, prompt: &SegmentPrompt) -> Result<LayerResult> {
        debug!("segment[{}]: fetching", layer_id);
        let handle = self.fetch_handle(layer_id)?;
        let bounds = self.backend.bounding_box(&handle.dataset_ref).await?;

        debug!("segment[{}]: previewing", layer_id);
        let vis = handle
            .vis_params
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let preview_size = self.config.vision_config.preview_size;
        let preview = self
            .backend
            .preview_url(&handle.dataset_ref, &vis, preview_size)
            .await?;

        debug!("segment[{}]: detecting", layer_id);
        let detections = self.vision.detect(&preview, prompt).await?;

        debug!("segment[{}]: projecting", layer_id);
        let rings = projection::project_detections(&detections, &bounds)?;
        if rings.is_empty() {
            return Err(AnalysisError::EmptyResult(format!(
                "no detections for layer {}",
                layer_id
            )));
        }

        let vector_name = sanitize_name(&format!("{} segments", handle.name));
        let style: Value = serde_json::from_str(SEGMENT_STYLE).expect("static style is valid json");
        let saved = self
            .backend
            .save_vector(&vector_name, &rings, style.clone())
            .await?;

        let vector_id = format!("segment-{}", Uuid::new_v4());
        let mut vector = LayerHandle::new(
            vector_id.clone(),
            vector_name.clone(),
            LayerKind::Vector,
            saved.dataset_ref,
        );
        vector.tile_url = saved.tile_url.clone();
        vector.vis_params = Some(style.clone());
        self.store.save(vector);

        info!(
            "segment[{}]: saved {} rings as {}",
            layer_id,
            rings.len(),
            vector_id
        );

        Ok(LayerResult {
            layer_id: vector_id,
            name: Some(vector_name),
            tile_url: saved.tile_url,
            band_info: Vec::new(),
            vis_params: Some(style),
            source_layer_id: Some(layer_id.to_string()),
            polygon_count: Some(rings.len()),
        })
    }

    /// Execute one batch item. This is the single function the dispatcher
    /// runs concurrently.
    async fn run_item(&self, item: WorkItem<ItemSnapshot>) -> Result<LayerResult> {
        let layer_id = item.layer_id;
        let snapshot = item.params;

        match snapshot.op.as_ref() {
            BatchOperation::CloudRemoval => {
                self.run_in_place("cloud_removal", &layer_id, snapshot.vis, json!({}))
                    .await
            }
            BatchOperation::ImageFilling => {
                self.run_in_place("image_filling", &layer_id, snapshot.vis, json!({}))
                    .await
            }
            BatchOperation::HistogramEqualization => {
                self.run_in_place("histogram_equalization", &layer_id, snapshot.vis, json!({}))
                    .await
            }
            BatchOperation::CalculateIndex { index } => {
                let mapping = band_mapping_for(&layer_id);
                self.run_in_place(
                    "band_index",
                    &layer_id,
                    snapshot.vis,
                    json!({ "index": index.as_str(), "bands": mapping }),
                )
                .await
            }
            BatchOperation::KmeansClustering { cluster_counts } => {
                let clusters = cluster_counts.get(&layer_id).copied().unwrap_or(5);
                self.run_derived(
                    "kmeans_clustering",
                    &layer_id,
                    "kmeans",
                    "k-means",
                    vec!["cluster".to_string()],
                    json!({ "bands": ["cluster"], "min": 0, "max": clusters - 1 }),
                    json!({ "num_clusters": clusters }),
                )
                .await
            }
            BatchOperation::SupervisedClassification {
                classifier,
                num_trees,
                kernel,
                train_ratio,
            } => {
                let class_count = snapshot.samples.len().max(1);
                self.run_derived(
                    "supervised_classification",
                    &layer_id,
                    "classified",
                    "classified",
                    vec!["classification".to_string()],
                    json!({
                        "bands": ["classification"],
                        "min": 0,
                        "max": class_count - 1,
                    }),
                    json!({
                        "classifier": classifier,
                        "num_trees": num_trees,
                        "kernel": kernel,
                        "train_ratio": train_ratio,
                        "training_classes": snapshot.samples.as_ref(),
                    }),
                )
                .await
            }
            BatchOperation::TerrainAnalysis => {
                self.run_derived(
                    "terrain",
                    &layer_id,
                    "terrain",
                    "terrain",
                    vec![
                        "elevation".to_string(),
                        "slope".to_string(),
                        "aspect".to_string(),
                        "hillshade".to_string(),
                    ],
                    json!({
                        "bands": ["elevation"],
                        "min": 0,
                        "max": 3000,
                        "palette": ["006600", "002200", "fff700", "ab7634", "c4d0ff", "ffffff"],
                    }),
                    json!({}),
                )
                .await
            }
            BatchOperation::RasterCalculator { expression } => {
                self.run_derived(
                    "raster_calculator",
                    &layer_id,
                    "calc",
                    "(calculated)",
                    Vec::new(),
                    snapshot.vis.clone().unwrap_or_else(|| json!({})),
                    json!({ "expression": expression }),
                )
                .await
            }
            BatchOperation::Segment { prompt } => self.run_segment(&layer_id, prompt).await,
        }
    }
}

/// Validate an operation against the whole batch before anything dispatches.
/// These are client errors, not per-item failures.
fn validate(op: &BatchOperation, layer_ids: &[String], ctx: &AnalysisContext) -> Result<()> {
    if layer_ids.is_empty() {
        return Err(AnalysisError::InvalidInput("empty layer_ids".to_string()));
    }

    match op {
        BatchOperation::KmeansClustering { cluster_counts } => {
            for (layer_id, clusters) in cluster_counts {
                if !(2..=50).contains(clusters) {
                    return Err(AnalysisError::InvalidInput(format!(
                        "cluster count for {} must be in 2..=50, got {}",
                        layer_id, clusters
                    )));
                }
            }
        }
        BatchOperation::SupervisedClassification { train_ratio, .. } => {
            if ctx.samples.is_empty() {
                return Err(AnalysisError::InvalidInput(
                    "no training samples registered".to_string(),
                ));
            }
            if !(0.0 < *train_ratio && *train_ratio < 1.0) {
                return Err(AnalysisError::InvalidInput(format!(
                    "train_ratio must be in (0, 1), got {}",
                    train_ratio
                )));
            }
        }
        BatchOperation::RasterCalculator { expression } => {
            if expression.trim().is_empty() {
                return Err(AnalysisError::InvalidInput("empty expression".to_string()));
            }
        }
        BatchOperation::Segment { prompt } => match prompt {
            SegmentPrompt::Text { prompt } if prompt.trim().is_empty() => {
                return Err(AnalysisError::InvalidInput("empty prompt".to_string()));
            }
            SegmentPrompt::Points { points } if points.is_empty() => {
                return Err(AnalysisError::InvalidInput("no point samples".to_string()));
            }
            _ => {}
        },
        _ => {}
    }

    Ok(())
}

/// Run one validated operation over the requested layers and aggregate the
/// outcome. `vis_overrides` maps layer ids to display parameters for this
/// request only.
pub async fn run_operation(
    ctx: Arc<AnalysisContext>,
    op: BatchOperation,
    layer_ids: Vec<String>,
    vis_overrides: HashMap<String, Value>,
) -> Result<AggregatedResponse> {
    validate(&op, &layer_ids, &ctx)?;

    let message = op.success_message();
    let op_name = op.name();

    // Freeze the training set once for the whole batch
    let samples: Arc<Vec<TrainingClass>> =
        if matches!(op, BatchOperation::SupervisedClassification { .. }) {
            Arc::new(
                ctx.samples
                    .snapshot()
                    .into_iter()
                    .enumerate()
                    .map(|(class_index, (_, set))| TrainingClass {
                        class_index,
                        class_name: set.class_name,
                        geometry: set.geometry,
                        features: set.features,
                    })
                    .collect(),
            )
        } else {
            Arc::new(Vec::new())
        };

    let op = Arc::new(op);
    let items = dispatcher::tag_items(&layer_ids, |layer_id| ItemSnapshot {
        op: Arc::clone(&op),
        vis: vis_overrides.get(layer_id).cloned(),
        samples: Arc::clone(&samples),
    });

    let max_concurrency = ctx.config.dispatcher_config.max_concurrency;
    let worker_ctx = Arc::clone(&ctx);
    let results = dispatcher::run_batch(op_name, items, max_concurrency, move |item| {
        let ctx = Arc::clone(&worker_ctx);
        async move { ctx.run_item(item).await }
    })
    .await;

    Ok(aggregate(results, &message))
}

/// Multi-layer band math: all inputs feed a single backend expression, so
/// this runs as one computation instead of a per-layer batch.
pub async fn run_raster_calculator_multi(
    ctx: Arc<AnalysisContext>,
    layer_ids: Vec<String>,
    expression: String,
) -> Result<AggregatedResponse> {
    if layer_ids.is_empty() {
        return Err(AnalysisError::InvalidInput("empty layer_ids".to_string()));
    }
    if expression.trim().is_empty() {
        return Err(AnalysisError::InvalidInput("empty expression".to_string()));
    }

    // Every input must resolve; a single computation has no per-item
    // degradation to fall back on.
    let mut inputs = Vec::with_capacity(layer_ids.len());
    let mut variables = serde_json::Map::new();
    for (position, layer_id) in layer_ids.iter().enumerate() {
        let handle = ctx.fetch_handle(layer_id)?;
        variables.insert(
            format!("img{}", position + 1),
            Value::String(handle.name.clone()),
        );
        inputs.push(handle.dataset_ref);
    }

    let result = ctx
        .backend
        .compute(
            "raster_calculator_multi",
            &inputs[0],
            json!({
                "inputs": inputs,
                "expression": expression,
                "variables": variables,
            }),
        )
        .await?;

    let calc_id = format!("calc-{}", Uuid::new_v4());
    let calc_name = sanitize_name(&format!("Calculated ({})", expression));
    let mut handle = LayerHandle::new(
        calc_id.clone(),
        calc_name.clone(),
        LayerKind::Raster,
        result.dataset_ref,
    );
    handle.tile_url = result.tile_url.clone();
    handle.band_info = result.bands.clone();
    ctx.store.save(handle);

    Ok(aggregate(
        vec![LayerResult {
            layer_id: calc_id,
            name: Some(calc_name),
            tile_url: result.tile_url,
            band_info: result.bands,
            vis_params: None,
            source_layer_id: None,
            polygon_count: None,
        }],
        "Expression evaluated",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_mapping_resolves_satellite_tags() {
        assert_eq!(band_mapping_for("layer-1-SENTINEL-2").nir, "B8");
        assert_eq!(band_mapping_for("layer-2-LANDSAT-5").nir, "B4");
        assert_eq!(band_mapping_for("layer-3-LANDSAT-8").nir, "B5");
        // Unknown tags fall back to Landsat 8/9
        assert_eq!(band_mapping_for("mystery").swir1, "B6");
    }

    #[test]
    fn sanitize_name_strips_hostile_characters() {
        assert_eq!(sanitize_name("My Layer (v2)!"), "My Layer _v2__");
        let long = "x".repeat(200);
        assert_eq!(sanitize_name(&long).len(), 100);
    }

    #[test]
    fn segment_style_is_valid_json() {
        let style: Value = serde_json::from_str(SEGMENT_STYLE).unwrap();
        assert_eq!(style["color"], "#FF4136");
    }
}
