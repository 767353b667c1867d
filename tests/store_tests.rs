//! Layer registry lifecycle and sample registry behavior under concurrency.

use chrono::Utc;
use geoscope_backend::{
    LayerHandle, LayerKind, LayerStore, SampleGeometry, SampleSet, SampleStore, StoreConfig,
};
use serde_json::json;
use std::sync::Arc;

fn config(max_entries: usize, idle_ttl_secs: u64) -> StoreConfig {
    StoreConfig {
        max_entries,
        idle_ttl_secs,
        sweep_interval_secs: 3600,
    }
}

fn raster(id: &str) -> LayerHandle {
    LayerHandle::new(
        id.to_string(),
        format!("Layer {}", id),
        LayerKind::Raster,
        format!("ref-{}", id),
    )
}

#[tokio::test]
async fn concurrent_saves_land_on_distinct_keys() {
    let store = Arc::new(LayerStore::new(config(100, 3600)));

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.save(raster(&format!("layer-{}", i)));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.len(), 32);
    for i in 0..32 {
        assert!(store.get(&format!("layer-{}", i)).is_some());
    }
}

#[test]
fn get_refreshes_last_access() {
    let store = LayerStore::new(config(10, 3600));
    let mut handle = raster("a");
    handle.last_access = Utc::now() - chrono::Duration::seconds(1000);
    store.save(handle);

    let before = store.get("a").unwrap().last_access;
    assert!(Utc::now().signed_duration_since(before).num_seconds() < 5);
}

#[test]
fn sweep_prefers_idle_layers_over_live_ones() {
    let store = LayerStore::new(config(2, 600));

    let mut idle = raster("idle");
    idle.last_access = Utc::now() - chrono::Duration::seconds(1200);
    store.save(idle);
    store.save(raster("live-1"));
    store.save(raster("live-2"));

    let removed = store.sweep();
    assert_eq!(removed, vec!["idle".to_string()]);
    assert!(store.get("live-1").is_some());
    assert!(store.get("live-2").is_some());
}

#[test]
fn vector_layers_share_the_registry() {
    let store = LayerStore::new(config(10, 3600));
    store.save(raster("source"));

    let mut vector = LayerHandle::new(
        "segment-1".to_string(),
        "source segments".to_string(),
        LayerKind::Vector,
        "ref-vec".to_string(),
    );
    vector.tile_url = "https://tiles/vec".to_string();
    store.save(vector);

    let handles = store.list();
    assert_eq!(handles.len(), 2);
    let vec_handle = store.get("segment-1").unwrap();
    assert_eq!(vec_handle.kind, LayerKind::Vector);
}

#[test]
fn sample_registry_snapshot_is_stable_and_isolated() {
    let samples = SampleStore::new();
    samples.add(
        "layer-water".to_string(),
        SampleSet {
            class_name: "water".to_string(),
            geometry: SampleGeometry::Polygon,
            features: vec![json!([[10.0, 20.0], [10.1, 20.0], [10.1, 20.1], [10.0, 20.0]])],
        },
    );
    samples.add(
        "layer-forest".to_string(),
        SampleSet {
            class_name: "forest".to_string(),
            geometry: SampleGeometry::Point,
            features: vec![json!([10.5, 20.5])],
        },
    );

    let snapshot = samples.snapshot();
    assert_eq!(snapshot.len(), 2);
    // Ordered by layer id, so class indices stay stable across batches
    assert_eq!(snapshot[0].1.class_name, "forest");
    assert_eq!(snapshot[1].1.class_name, "water");

    // Mutating the registry after snapshotting leaves the snapshot intact
    samples.remove("layer-forest");
    assert_eq!(snapshot.len(), 2);
    assert_eq!(samples.len(), 1);
}
