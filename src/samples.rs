//! Training-sample registry for supervised classification.
//!
//! Samples are drawn on the map by the user (points or polygons) or imported
//! from a vector layer, one class per source layer id. Classification
//! adapters read an immutable snapshot of the whole set at the batch
//! boundary, so concurrent edits never leak into running tasks.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleGeometry {
    Point,
    Polygon,
    Vector,
}

/// One class worth of training features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSet {
    pub class_name: String,
    pub geometry: SampleGeometry,
    /// Raw feature coordinates as submitted; points are `[lon, lat]`, polygon
    /// features carry their exterior ring. Vector samples reference the
    /// backend dataset of the owning layer instead.
    pub features: Vec<serde_json::Value>,
}

pub struct SampleStore {
    samples: Arc<DashMap<String, SampleSet>>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(DashMap::new()),
        }
    }

    pub fn add(&self, layer_id: String, set: SampleSet) {
        tracing::info!(
            "Sample class '{}' registered for layer {}",
            set.class_name,
            layer_id
        );
        self.samples.insert(layer_id, set);
    }

    pub fn remove(&self, layer_id: &str) -> Option<SampleSet> {
        self.samples.remove(layer_id).map(|(_, set)| set)
    }

    /// Immutable snapshot of every class, keyed by owning layer id.
    pub fn snapshot(&self) -> Vec<(String, SampleSet)> {
        let mut all: Vec<(String, SampleSet)> = self
            .samples
            .iter()
            .map(|entry| (entry.key().clone(), entry.clone()))
            .collect();
        // Class index assignment must be stable across workers
        all.sort_by(|(a, _), (b, _)| a.cmp(b));
        all
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}
