//! Response aggregation for batch endpoints.
//!
//! Wraps the dispatcher's ordered output into the outward envelope. Success
//! is decided from item-level outcomes: a batch where nothing survived is an
//! error, never `{success: true, results: []}`.

use serde::Serialize;
use serde_json::Value;

/// Per-item payload of a batch response. `layer_id` names the layer the
/// entry is about (for derived outputs, the newly created layer).
#[derive(Debug, Clone, Serialize)]
pub struct LayerResult {
    pub layer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tile_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub band_info: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vis_params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_layer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon_count: Option<usize>,
}

/// Outward batch envelope: `results` preserves the caller's original item
/// order with failed items omitted.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<LayerResult>,
}

/// Decide overall success from the surviving per-item payloads.
pub fn aggregate(results: Vec<LayerResult>, success_message: &str) -> AggregatedResponse {
    let success = !results.is_empty();
    let message = if success {
        success_message.to_string()
    } else {
        "All requested layers failed to process".to_string()
    };
    AggregatedResponse {
        success,
        message,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str) -> LayerResult {
        LayerResult {
            layer_id: id.to_string(),
            name: None,
            tile_url: format!("https://tiles/{}", id),
            band_info: Vec::new(),
            vis_params: None,
            source_layer_id: None,
            polygon_count: None,
        }
    }

    #[test]
    fn non_empty_results_are_a_success() {
        let response = aggregate(vec![result("a")], "done");
        assert!(response.success);
        assert_eq!(response.message, "done");
        assert_eq!(response.results.len(), 1);
    }

    #[test]
    fn empty_results_are_a_failure_not_an_empty_success() {
        let response = aggregate(Vec::new(), "done");
        assert!(!response.success);
        assert_ne!(response.message, "done");
        assert!(response.results.is_empty());
    }
}
