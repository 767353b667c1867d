mod analysis;
mod api;
mod config;
mod dispatcher;
mod error;
mod geo_backend;
mod layer_store;
mod metrics;
mod projection;
mod response;
mod samples;
mod vision;

use anyhow::Result;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with filters
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting geospatial analysis node...");

    // Initialize metrics
    metrics::init_metrics();
    tracing::info!("Metrics system initialized");

    // Load configuration
    let config = Arc::new(config::Config::load()?);

    // Layer registry with lifecycle sweep (the original kept layers in an
    // unbounded process-wide dict; this one expires and evicts)
    let store = Arc::new(layer_store::LayerStore::new(config.store_config.clone()));
    layer_store::LayerStore::spawn_sweeper(Arc::clone(&store));
    tracing::info!(
        "Layer store initialized (max {} entries, {}s idle TTL)",
        config.store_config.max_entries,
        config.store_config.idle_ttl_secs
    );

    let samples = Arc::new(samples::SampleStore::new());

    // External collaborators
    let backend = Arc::new(geo_backend::GeoBackendClient::new(
        config.backend_config.clone(),
    )?);
    tracing::info!(
        "Geospatial backend client ready ({})",
        config.backend_config.base_url
    );

    let vision = Arc::new(vision::VisionClient::new(config.vision_config.clone())?);
    tracing::info!(
        "Vision model client ready ({})",
        config.vision_config.base_url
    );

    let ctx = Arc::new(analysis::AnalysisContext {
        store,
        samples,
        backend,
        vision,
        config: Arc::clone(&config),
    });

    let app = api::create_router(ctx);

    // Start API server
    tracing::info!(
        "Analysis API listening on http://{}:{}",
        config.api_host,
        config.api_port
    );
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.api_host, config.api_port)).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
