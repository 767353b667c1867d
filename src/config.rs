use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub backend_config: BackendConfig,
    pub vision_config: VisionConfig,
    pub dispatcher_config: DispatcherConfig,
    pub store_config: StoreConfig,
}

/// External geospatial compute backend (stores datasets, runs the raster
/// algebra). Calls are synchronous round trips to a cloud service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    /// TTL for cached idempotent reads (bounding boxes), seconds.
    pub read_cache_ttl_secs: u64,
}

/// Vision segmentation model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub box_threshold: f32,
    pub text_threshold: f32,
    /// Pixel size of the preview raster submitted for detection.
    pub preview_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Upper bound on concurrently running batch items.
    pub max_concurrency: usize,
}

/// Lifecycle policy for the in-memory layer registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub max_entries: usize,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let backend_base_url = env::var("GEO_BACKEND_URL")
            .unwrap_or_else(|_| "http://localhost:9090".to_string());

        let backend_token = env::var("GEO_BACKEND_TOKEN").ok();

        let backend_timeout = env::var("GEO_BACKEND_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let read_cache_ttl = env::var("GEO_BACKEND_CACHE_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let vision_base_url = env::var("VISION_MODEL_URL")
            .unwrap_or_else(|_| "http://localhost:9191".to_string());

        let vision_timeout = env::var("VISION_MODEL_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .unwrap_or(120);

        let box_threshold = env::var("VISION_BOX_THRESHOLD")
            .unwrap_or_else(|_| "0.24".to_string())
            .parse()
            .unwrap_or(0.24);

        let text_threshold = env::var("VISION_TEXT_THRESHOLD")
            .unwrap_or_else(|_| "0.24".to_string())
            .parse()
            .unwrap_or(0.24);

        let preview_size = env::var("VISION_PREVIEW_SIZE")
            .unwrap_or_else(|_| "1024".to_string())
            .parse()
            .unwrap_or(1024);

        let max_concurrency = env::var("MAX_TASK_CONCURRENCY")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .unwrap_or(4);

        let store_max_entries = env::var("LAYER_STORE_MAX_ENTRIES")
            .unwrap_or_else(|_| "512".to_string())
            .parse()
            .unwrap_or(512);

        let store_idle_ttl = env::var("LAYER_STORE_IDLE_TTL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86400);

        let store_sweep_interval = env::var("LAYER_STORE_SWEEP_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        Ok(Self {
            api_host,
            api_port,
            backend_config: BackendConfig {
                base_url: backend_base_url,
                api_token: backend_token,
                request_timeout_secs: backend_timeout,
                read_cache_ttl_secs: read_cache_ttl,
            },
            vision_config: VisionConfig {
                base_url: vision_base_url,
                request_timeout_secs: vision_timeout,
                box_threshold,
                text_threshold,
                preview_size,
            },
            dispatcher_config: DispatcherConfig { max_concurrency },
            store_config: StoreConfig {
                max_entries: store_max_entries,
                idle_ttl_secs: store_idle_ttl,
                sweep_interval_secs: store_sweep_interval,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn load_uses_defaults_without_env() {
        let config = Config::load().unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.dispatcher_config.max_concurrency, 4);
        assert_eq!(config.vision_config.preview_size, 1024);
        assert_eq!(config.store_config.max_entries, 512);
    }
}
