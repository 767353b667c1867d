//! Layer Registry Module
//!
//! Centralized lifecycle management for layer handles. The analysis core only
//! ever holds `layer_id` strings; this registry maps them to the opaque
//! dataset references owned by the geospatial compute backend.
//!
//! ## Responsibilities
//! - Track layer metadata (name, kind, dataset_ref, tile_url, band_info)
//! - Expire handles idle past a configurable TTL
//! - Evict least-recently-used handles above a capacity bound
//! - Expose registry size for observability

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;

/// What kind of dataset a handle points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Raster,
    Vector,
}

/// One registered layer. `dataset_ref` is an opaque token understood only by
/// the compute backend; the registry never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerHandle {
    pub layer_id: String,
    pub name: String,
    pub kind: LayerKind,
    pub dataset_ref: String,
    pub tile_url: String,
    pub band_info: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vis_params: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl LayerHandle {
    pub fn new(layer_id: String, name: String, kind: LayerKind, dataset_ref: String) -> Self {
        let now = Utc::now();
        Self {
            layer_id,
            name,
            kind,
            dataset_ref,
            tile_url: String::new(),
            band_info: Vec::new(),
            vis_params: None,
            created_at: now,
            last_access: now,
        }
    }

    /// Update last_access timestamp
    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let secs = now.signed_duration_since(self.last_access).num_seconds();
        Duration::from_secs(secs.max(0) as u64)
    }
}

/// Concurrency-safe layer registry with an explicit lifecycle policy.
///
/// Each batch worker reads its own handle snapshot and only ever writes under
/// its own layer id, so a single concurrent map suffices.
pub struct LayerStore {
    layers: Arc<DashMap<String, LayerHandle>>,
    config: StoreConfig,
}

impl LayerStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            layers: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Fetch a snapshot of a handle, refreshing its last_access.
    pub fn get(&self, layer_id: &str) -> Option<LayerHandle> {
        self.layers.get_mut(layer_id).map(|mut entry| {
            entry.touch();
            entry.clone()
        })
    }

    /// Insert or replace a handle.
    pub fn save(&self, handle: LayerHandle) {
        self.layers.insert(handle.layer_id.clone(), handle);
        crate::metrics::LAYERS_ACTIVE.set(self.layers.len() as i64);
    }

    /// Remove a handle, returning it if present.
    pub fn remove(&self, layer_id: &str) -> Option<LayerHandle> {
        let removed = self.layers.remove(layer_id).map(|(_, handle)| handle);
        crate::metrics::LAYERS_ACTIVE.set(self.layers.len() as i64);
        removed
    }

    /// Rename a layer in place.
    pub fn rename(&self, layer_id: &str, new_name: &str) -> bool {
        if let Some(mut entry) = self.layers.get_mut(layer_id) {
            entry.name = new_name.to_string();
            entry.touch();
            true
        } else {
            false
        }
    }

    /// List all handles, request order is unspecified.
    pub fn list(&self) -> Vec<LayerHandle> {
        self.layers.iter().map(|entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Expire idle handles and evict LRU overflow, returns removed ids.
    ///
    /// Idle expiry goes first so a sweep on a full registry prefers dropping
    /// dead handles over live ones.
    pub fn sweep(&self) -> Vec<String> {
        let now = Utc::now();
        let idle_ttl = Duration::from_secs(self.config.idle_ttl_secs);
        let mut removed = Vec::new();

        let expired: Vec<String> = self
            .layers
            .iter()
            .filter(|entry| entry.idle_for(now) >= idle_ttl)
            .map(|entry| entry.key().clone())
            .collect();
        for layer_id in expired {
            if self.layers.remove(&layer_id).is_some() {
                tracing::info!("Layer expired after idle TTL: {}", layer_id);
                removed.push(layer_id);
            }
        }

        // LRU eviction above capacity
        let overflow = self.layers.len().saturating_sub(self.config.max_entries);
        if overflow > 0 {
            let mut by_age: Vec<(String, DateTime<Utc>)> = self
                .layers
                .iter()
                .map(|entry| (entry.key().clone(), entry.last_access))
                .collect();
            by_age.sort_by_key(|(_, last_access)| *last_access);

            for (layer_id, _) in by_age.into_iter().take(overflow) {
                if self.layers.remove(&layer_id).is_some() {
                    tracing::info!("Layer evicted over capacity: {}", layer_id);
                    removed.push(layer_id);
                }
            }
        }

        if !removed.is_empty() {
            crate::metrics::LAYERS_EVICTED.inc_by(removed.len() as u64);
        }
        crate::metrics::LAYERS_ACTIVE.set(self.layers.len() as i64);
        removed
    }

    /// Spawn the periodic lifecycle sweep for a shared store.
    pub fn spawn_sweeper(store: Arc<LayerStore>) {
        let interval = Duration::from_secs(store.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick
            loop {
                ticker.tick().await;
                let removed = store.sweep();
                if !removed.is_empty() {
                    tracing::debug!("Lifecycle sweep removed {} layers", removed.len());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StoreConfig {
        StoreConfig {
            max_entries: 3,
            idle_ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }

    fn handle(id: &str) -> LayerHandle {
        LayerHandle::new(
            id.to_string(),
            format!("Layer {}", id),
            LayerKind::Raster,
            format!("ref-{}", id),
        )
    }

    #[test]
    fn save_get_remove_roundtrip() {
        let store = LayerStore::new(test_config());

        store.save(handle("a"));
        assert_eq!(store.len(), 1);

        let got = store.get("a").unwrap();
        assert_eq!(got.dataset_ref, "ref-a");
        assert!(store.get("missing").is_none());

        let removed = store.remove("a").unwrap();
        assert_eq!(removed.layer_id, "a");
        assert!(store.is_empty());
    }

    #[test]
    fn rename_updates_in_place() {
        let store = LayerStore::new(test_config());
        store.save(handle("a"));

        assert!(store.rename("a", "renamed"));
        assert_eq!(store.get("a").unwrap().name, "renamed");
        assert!(!store.rename("missing", "x"));
    }

    #[test]
    fn sweep_evicts_lru_overflow() {
        let store = LayerStore::new(test_config());

        for id in ["a", "b", "c", "d", "e"] {
            let mut h = handle(id);
            // Stagger last_access so the LRU order is deterministic
            h.last_access = Utc::now() - chrono::Duration::seconds(match id {
                "a" => 50,
                "b" => 40,
                "c" => 30,
                "d" => 20,
                _ => 10,
            });
            store.save(h);
        }

        let removed = store.sweep();
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&"a".to_string()));
        assert!(removed.contains(&"b".to_string()));
        assert_eq!(store.len(), 3);
        assert!(store.get("e").is_some());
    }

    #[test]
    fn sweep_expires_idle_handles() {
        let config = StoreConfig {
            max_entries: 10,
            idle_ttl_secs: 60,
            sweep_interval_secs: 60,
        };
        let store = LayerStore::new(config);

        let mut stale = handle("stale");
        stale.last_access = Utc::now() - chrono::Duration::seconds(120);
        store.save(stale);
        store.save(handle("fresh"));

        let removed = store.sweep();
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(store.get("fresh").is_some());
    }
}
