//! HTTP API surface.
//!
//! Thin axum handlers: parse the request, validate it into a typed
//! operation, hand it to the analysis layer, and map the aggregated outcome
//! onto the outward `{success, message, results}` envelope. Client errors
//! are rejected here with 400 before any work is dispatched; a batch where
//! every item failed is reported as an error response, never an empty
//! success.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::analysis::{
    self, AnalysisContext, BatchOperation, ClassifierKind, IndexKind,
};
use crate::error::AnalysisError;
use crate::metrics;
use crate::response::AggregatedResponse;
use crate::samples::{SampleGeometry, SampleSet};
use crate::vision::SegmentPrompt;

pub struct ApiError(AnalysisError);

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AnalysisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AnalysisError::LayerNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "success": false, "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

/// Map an aggregated batch outcome onto HTTP: all-failed batches are an
/// error response.
fn batch_reply(response: AggregatedResponse) -> Response {
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(response)).into_response()
}

/// Per-layer display override as submitted by the client.
#[derive(Debug, Deserialize)]
pub struct LayerVis {
    pub id: String,
    pub vis_params: Value,
}

fn vis_map(overrides: Vec<LayerVis>) -> HashMap<String, Value> {
    overrides
        .into_iter()
        .map(|entry| (entry.id, entry.vis_params))
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub layer_ids: Vec<String>,
    #[serde(default)]
    pub vis_params: Vec<LayerVis>,
}

#[derive(Debug, Deserialize)]
pub struct CalculateIndexRequest {
    pub layer_ids: Vec<String>,
    pub index_type: IndexKind,
    #[serde(default)]
    pub vis_params: Vec<LayerVis>,
}

#[derive(Debug, Deserialize)]
pub struct KmeansRequest {
    pub layer_ids: Vec<String>,
    #[serde(default)]
    pub cluster_counts: HashMap<String, u32>,
}

fn default_num_trees() -> u32 {
    50
}

fn default_train_ratio() -> f64 {
    0.7
}

fn default_classifier() -> ClassifierKind {
    ClassifierKind::RandomForest
}

#[derive(Debug, Deserialize)]
pub struct ClassificationRequest {
    pub layer_ids: Vec<String>,
    #[serde(default = "default_classifier")]
    pub classifier: ClassifierKind,
    #[serde(default = "default_num_trees")]
    pub num_trees: u32,
    #[serde(default)]
    pub kernel: Option<String>,
    #[serde(default = "default_train_ratio")]
    pub train_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcMode {
    #[default]
    Single,
    Multi,
}

#[derive(Debug, Deserialize)]
pub struct RasterCalculatorRequest {
    pub layer_ids: Vec<String>,
    pub expression: String,
    #[serde(default)]
    pub mode: CalcMode,
}

#[derive(Debug, Deserialize)]
pub struct SegmentRequest {
    pub layer_ids: Vec<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub points: Option<Vec<[f64; 2]>>,
}

#[derive(Debug, Deserialize)]
pub struct LayerIdRequest {
    pub layer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameLayerRequest {
    pub layer_id: String,
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LayerStatsRequest {
    pub layer_id: String,
    pub bands: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddSampleRequest {
    pub layer_id: String,
    pub class_name: String,
    pub geometry_type: SampleGeometry,
    pub features: Vec<Value>,
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics_handler() -> String {
    metrics::export_metrics()
}

async fn list_layers(State(ctx): State<Arc<AnalysisContext>>) -> Json<Value> {
    let mut handles = ctx.store.list();
    handles.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let layers: Vec<Value> = handles
        .into_iter()
        .map(|handle| {
            json!({
                "id": handle.layer_id,
                "name": handle.name,
                "kind": handle.kind,
                "band_info": handle.band_info,
            })
        })
        .collect();
    Json(json!({ "success": true, "layers": layers }))
}

async fn remove_layer(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<LayerIdRequest>,
) -> ApiResult {
    ctx.store
        .remove(&req.layer_id)
        .ok_or(AnalysisError::LayerNotFound(req.layer_id.clone()))?;
    tracing::info!("Layer removed: {}", req.layer_id);
    Ok(Json(json!({ "success": true, "message": "Layer removed" })).into_response())
}

async fn rename_layer(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<RenameLayerRequest>,
) -> ApiResult {
    if req.new_name.trim().is_empty() {
        return Err(AnalysisError::InvalidInput("empty layer name".to_string()).into());
    }
    if !ctx.store.rename(&req.layer_id, &req.new_name) {
        return Err(AnalysisError::LayerNotFound(req.layer_id).into());
    }
    Ok(Json(json!({ "success": true, "message": "Layer renamed" })).into_response())
}

async fn layer_stats(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<LayerStatsRequest>,
) -> ApiResult {
    if req.bands.is_empty() {
        return Err(AnalysisError::InvalidInput("no bands requested".to_string()).into());
    }
    let handle = ctx
        .store
        .get(&req.layer_id)
        .ok_or(AnalysisError::LayerNotFound(req.layer_id.clone()))?;
    let stats = ctx.backend.band_stats(&handle.dataset_ref, &req.bands).await?;
    Ok(Json(json!({ "success": true, "min": stats.min, "max": stats.max })).into_response())
}

async fn list_samples(State(ctx): State<Arc<AnalysisContext>>) -> Json<Value> {
    let samples: Vec<Value> = ctx
        .samples
        .snapshot()
        .into_iter()
        .map(|(layer_id, set)| {
            json!({
                "layer_id": layer_id,
                "class_name": set.class_name,
                "geometry_type": set.geometry,
                "feature_count": set.features.len(),
            })
        })
        .collect();
    Json(json!({ "success": true, "samples": samples }))
}

async fn add_sample(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<AddSampleRequest>,
) -> ApiResult {
    if req.class_name.trim().is_empty() {
        return Err(AnalysisError::InvalidInput("empty class name".to_string()).into());
    }
    if req.features.is_empty() && req.geometry_type != SampleGeometry::Vector {
        return Err(AnalysisError::InvalidInput("no sample features".to_string()).into());
    }
    let class_name = req.class_name.clone();
    ctx.samples.add(
        req.layer_id,
        SampleSet {
            class_name: req.class_name,
            geometry: req.geometry_type,
            features: req.features,
        },
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Sample class '{}' added", class_name),
    }))
    .into_response())
}

async fn remove_sample(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<LayerIdRequest>,
) -> ApiResult {
    match ctx.samples.remove(&req.layer_id) {
        Some(set) => Ok(Json(json!({
            "success": true,
            "message": format!("Sample class '{}' removed", set.class_name),
        }))
        .into_response()),
        None => Ok(Json(json!({
            "success": false,
            "message": format!("No sample found for layer {}", req.layer_id),
        }))
        .into_response()),
    }
}

async fn cloud_removal(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<BatchRequest>,
) -> ApiResult {
    let response = analysis::run_operation(
        ctx,
        BatchOperation::CloudRemoval,
        req.layer_ids,
        vis_map(req.vis_params),
    )
    .await?;
    Ok(batch_reply(response))
}

async fn image_filling(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<BatchRequest>,
) -> ApiResult {
    let response = analysis::run_operation(
        ctx,
        BatchOperation::ImageFilling,
        req.layer_ids,
        vis_map(req.vis_params),
    )
    .await?;
    Ok(batch_reply(response))
}

async fn histogram_equalization(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<BatchRequest>,
) -> ApiResult {
    let response = analysis::run_operation(
        ctx,
        BatchOperation::HistogramEqualization,
        req.layer_ids,
        vis_map(req.vis_params),
    )
    .await?;
    Ok(batch_reply(response))
}

async fn calculate_index(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<CalculateIndexRequest>,
) -> ApiResult {
    let response = analysis::run_operation(
        ctx,
        BatchOperation::CalculateIndex {
            index: req.index_type,
        },
        req.layer_ids,
        vis_map(req.vis_params),
    )
    .await?;
    Ok(batch_reply(response))
}

async fn kmeans_clustering(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<KmeansRequest>,
) -> ApiResult {
    let response = analysis::run_operation(
        ctx,
        BatchOperation::KmeansClustering {
            cluster_counts: req.cluster_counts,
        },
        req.layer_ids,
        HashMap::new(),
    )
    .await?;
    Ok(batch_reply(response))
}

async fn supervised_classification(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<ClassificationRequest>,
) -> ApiResult {
    let response = analysis::run_operation(
        ctx,
        BatchOperation::SupervisedClassification {
            classifier: req.classifier,
            num_trees: req.num_trees,
            kernel: req.kernel,
            train_ratio: req.train_ratio,
        },
        req.layer_ids,
        HashMap::new(),
    )
    .await?;
    Ok(batch_reply(response))
}

async fn terrain_analysis(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<BatchRequest>,
) -> ApiResult {
    let response = analysis::run_operation(
        ctx,
        BatchOperation::TerrainAnalysis,
        req.layer_ids,
        vis_map(req.vis_params),
    )
    .await?;
    Ok(batch_reply(response))
}

async fn raster_calculator(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<RasterCalculatorRequest>,
) -> ApiResult {
    let response = match req.mode {
        CalcMode::Single => {
            analysis::run_operation(
                ctx,
                BatchOperation::RasterCalculator {
                    expression: req.expression,
                },
                req.layer_ids,
                HashMap::new(),
            )
            .await?
        }
        CalcMode::Multi => {
            analysis::run_raster_calculator_multi(ctx, req.layer_ids, req.expression).await?
        }
    };
    Ok(batch_reply(response))
}

async fn segment(
    State(ctx): State<Arc<AnalysisContext>>,
    Json(req): Json<SegmentRequest>,
) -> ApiResult {
    // Point samples win when both are supplied; the text prompt default
    // mirrors the model's original tuning target.
    let prompt = match (req.points, req.prompt) {
        (Some(points), _) if !points.is_empty() => SegmentPrompt::Points { points },
        (_, Some(text)) => SegmentPrompt::Text { prompt: text },
        _ => SegmentPrompt::Text {
            prompt: "tree".to_string(),
        },
    };

    let response = analysis::run_operation(
        ctx,
        BatchOperation::Segment { prompt },
        req.layer_ids,
        HashMap::new(),
    )
    .await?;
    Ok(batch_reply(response))
}

pub fn create_router(ctx: Arc<AnalysisContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/layers", get(list_layers))
        .route("/layers/remove", post(remove_layer))
        .route("/layers/rename", post(rename_layer))
        .route("/layers/stats", post(layer_stats))
        .route("/samples", get(list_samples))
        .route("/samples/add", post(add_sample))
        .route("/samples/remove", post(remove_sample))
        .route("/tools/cloud-removal", post(cloud_removal))
        .route("/tools/image-filling", post(image_filling))
        .route("/tools/histogram-equalization", post(histogram_equalization))
        .route("/tools/calculate-index", post(calculate_index))
        .route("/tools/kmeans-clustering", post(kmeans_clustering))
        .route("/tools/supervised-classification", post(supervised_classification))
        .route("/tools/terrain-analysis", post(terrain_analysis))
        .route("/tools/raster-calculator", post(raster_calculator))
        .route("/ai/segment", post(segment))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
