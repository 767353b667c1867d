use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Batch dispatch metrics
    pub static ref BATCH_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("batch_requests_total", "Total number of batch analysis requests"),
        &["operation"]
    ).unwrap();

    pub static ref BATCH_ITEMS: IntCounterVec = IntCounterVec::new(
        Opts::new("batch_items_total", "Total number of per-layer tasks dispatched"),
        &["operation"]
    ).unwrap();

    pub static ref ITEM_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("item_failures_total", "Total number of per-layer tasks that failed"),
        &["operation"]
    ).unwrap();

    pub static ref TASKS_IN_FLIGHT: IntGauge = IntGauge::new(
        "tasks_in_flight",
        "Current number of batch items executing concurrently"
    ).unwrap();

    pub static ref DISPATCH_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "batch_dispatch_duration_seconds",
            "Wall-clock time of a full batch, submit to barrier"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["operation"]
    ).unwrap();

    // Layer store metrics
    pub static ref LAYERS_ACTIVE: IntGauge = IntGauge::new(
        "layers_active",
        "Current number of layer handles in the registry"
    ).unwrap();

    pub static ref LAYERS_EVICTED: IntCounter = IntCounter::new(
        "layers_evicted_total",
        "Total number of layer handles removed by the lifecycle sweep"
    ).unwrap();

    // External collaborator metrics
    pub static ref BACKEND_CALLS: IntCounterVec = IntCounterVec::new(
        Opts::new("backend_calls_total", "Total calls to the geospatial compute backend"),
        &["call"]
    ).unwrap();

    pub static ref VISION_CALLS: IntCounter = IntCounter::new(
        "vision_calls_total",
        "Total calls to the vision segmentation model"
    ).unwrap();

    pub static ref BACKEND_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "backend_call_duration_seconds",
            "Geospatial backend round-trip latency in seconds"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(BATCH_REQUESTS.clone())).unwrap();
    REGISTRY.register(Box::new(BATCH_ITEMS.clone())).unwrap();
    REGISTRY.register(Box::new(ITEM_FAILURES.clone())).unwrap();
    REGISTRY.register(Box::new(TASKS_IN_FLIGHT.clone())).unwrap();
    REGISTRY.register(Box::new(DISPATCH_LATENCY.clone())).unwrap();

    REGISTRY.register(Box::new(LAYERS_ACTIVE.clone())).unwrap();
    REGISTRY.register(Box::new(LAYERS_EVICTED.clone())).unwrap();

    REGISTRY.register(Box::new(BACKEND_CALLS.clone())).unwrap();
    REGISTRY.register(Box::new(VISION_CALLS.clone())).unwrap();
    REGISTRY.register(Box::new(BACKEND_LATENCY.clone())).unwrap();

    tracing::info!(
        "Metrics registry initialized with {} collectors",
        REGISTRY.gather().len()
    );
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration_seconds(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
