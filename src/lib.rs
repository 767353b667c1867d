pub mod analysis;
pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod geo_backend;
pub mod layer_store;
pub mod metrics;
pub mod projection;
pub mod response;
pub mod samples;
pub mod vision;

// Re-export commonly used types for easier testing
pub use crate::analysis::{AnalysisContext, BatchOperation, ClassifierKind, IndexKind};
pub use crate::config::{Config, StoreConfig};
pub use crate::dispatcher::{run_batch, tag_items, WorkItem};
pub use crate::error::AnalysisError;
pub use crate::geo_backend::{BandStats, ComputeResult, GeoBackendClient, VisParams};
pub use crate::layer_store::{LayerHandle, LayerKind, LayerStore};
pub use crate::projection::{
    project_detections, project_mask, project_rects, DetectionSet, GeoBounds, GeoPolygon,
    PixelRect,
};
pub use crate::response::{aggregate, AggregatedResponse, LayerResult};
pub use crate::samples::{SampleGeometry, SampleSet, SampleStore};
pub use crate::vision::{SegmentPrompt, VisionClient};
